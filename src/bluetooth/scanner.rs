/// Bluetooth Low Energy presence check for the target detector
use bluer::{Adapter, AdapterEvent, Address};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::time::{timeout, Duration};

use crate::error::SessionError;

fn connection_error(context: &str, e: bluer::Error) -> SessionError {
    error!("{}: {}", context, e);
    SessionError::Connection(format!("{}: {}", context, e))
}

/// Confirm that `address` is reachable before handing it to the bridge
///
/// A device BlueZ already knows as paired is accepted right away. Otherwise
/// a Low Energy discovery runs until the address shows up or `scan_duration`
/// elapses.
///
/// # Returns
/// Ok if the device is paired or was seen, `SessionError::Connection` otherwise
pub async fn ensure_reachable(address: Address, scan_duration: Duration) -> Result<(), SessionError> {
    // Initialize Bluetooth session
    let session = bluer::Session::new()
        .await
        .map_err(|e| connection_error("Failed to create Bluetooth session", e))?;

    // Get the default Bluetooth adapter
    let adapter = session
        .default_adapter()
        .await
        .map_err(|e| connection_error("Failed to get default Bluetooth adapter", e))?;

    // Ensure Bluetooth adapter is powered on
    adapter
        .set_powered(true)
        .await
        .map_err(|e| connection_error("Failed to power on adapter", e))?;

    if is_paired(&adapter, address).await {
        info!("{} is paired with adapter {}", address, adapter.name());
        return Ok(());
    }

    // Configure discovery filter for Low Energy devices only
    let filter = bluer::DiscoveryFilter {
        transport: bluer::DiscoveryTransport::Le,
        duplicate_data: false,
        ..Default::default()
    };

    // Apply the discovery filter (warn if it fails, but continue)
    if let Err(e) = adapter.set_discovery_filter(filter).await {
        warn!("Failed to set discovery filter: {}", e);
    }

    info!("Scanning up to {:?} for {}", scan_duration, address);
    let mut events = Box::pin(
        adapter
            .discover_devices()
            .await
            .map_err(|e| connection_error("Failed to start device discovery", e))?,
    );

    let seen = timeout(scan_duration, async {
        while let Some(event) = events.next().await {
            debug!("Discovery event: {:?}", event);
            if let AdapterEvent::DeviceAdded(found) = event {
                if found == address {
                    return true;
                }
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    if seen {
        info!("Found {}", address);
        Ok(())
    } else {
        Err(SessionError::Connection(format!(
            "Bluetooth device {} not found within {:?}",
            address, scan_duration
        )))
    }
}

async fn is_paired(adapter: &Adapter, address: Address) -> bool {
    let known = match adapter.device_addresses().await {
        Ok(addresses) => addresses.contains(&address),
        Err(e) => {
            debug!("Failed to get device addresses: {}", e);
            false
        }
    };
    if !known {
        return false;
    }

    match adapter.device(address) {
        Ok(device) => device.is_paired().await.unwrap_or(false),
        Err(_) => false,
    }
}
