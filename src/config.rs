use bluer::Address;
use log::info;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, SessionError};

const DEFAULT_PYTHON: &str = "python3";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 2;
const DEFAULT_BLE_SCAN_SECS: u64 = 10;

/// The one identifier a session connects with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    Bluetooth(Address),
    Serial(String),
}

impl ConnectionTarget {
    /// Build a target from optional identifiers; exactly one must be non-empty.
    pub fn from_identifiers(bluetooth_mac: Option<&str>, serial: Option<&str>) -> Result<Self> {
        let bluetooth_mac = bluetooth_mac.map(str::trim).filter(|s| !s.is_empty());
        let serial = serial.map(str::trim).filter(|s| !s.is_empty());

        match (bluetooth_mac, serial) {
            (Some(mac), None) => {
                let address = Address::from_str(mac).map_err(|_| {
                    SessionError::Configuration(format!("Invalid Bluetooth address '{}'", mac))
                })?;
                Ok(ConnectionTarget::Bluetooth(address))
            }
            (None, Some(serial)) => Ok(ConnectionTarget::Serial(serial.to_string())),
            (Some(_), Some(_)) => Err(SessionError::Configuration(
                "Both a Bluetooth address and a serial number were given, use only one".into(),
            )),
            (None, None) => Err(SessionError::Configuration(
                "No device identifier given. Set RADIACODE_BLUETOOTH_MAC or RADIACODE_SERIAL, or pass --bluetooth-mac/--serial".into(),
            )),
        }
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionTarget::Bluetooth(address) => write!(f, "Bluetooth {}", address),
            ConnectionTarget::Serial(serial) => write!(f, "USB serial {}", serial),
        }
    }
}

/// Timeout and retry policy for device round trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundTrip {
    pub timeout: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for RoundTrip {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retries: DEFAULT_RETRIES,
            retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub target: ConnectionTarget,
    pub python: String,
    /// Extra `PYTHONPATH` entry for the bridge helper, e.g. an SDK checkout.
    pub sdk_path: Option<PathBuf>,
    pub connect_timeout: Duration,
    pub round_trip: RoundTrip,
    /// Zero skips the Bluetooth presence check.
    pub ble_scan_duration: Duration,
}

impl SessionConfig {
    /// Load configuration from the environment (and `.env`).
    ///
    /// Identifiers passed in `bluetooth_mac`/`serial` (command line) replace
    /// the environment ones when either is given.
    pub fn new(bluetooth_mac: Option<String>, serial: Option<String>) -> Result<Self> {
        // Load environment variables
        dotenv::dotenv().ok();

        Self::from_lookup(bluetooth_mac, serial, |key| env::var(key).ok())
    }

    /// Same as [`SessionConfig::new`], reading variables through `lookup`.
    pub fn from_lookup<F>(
        bluetooth_mac: Option<String>,
        serial: Option<String>,
        lookup: F,
    ) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (bluetooth_mac, serial) = if bluetooth_mac.is_some() || serial.is_some() {
            (bluetooth_mac, serial)
        } else {
            (lookup("RADIACODE_BLUETOOTH_MAC"), lookup("RADIACODE_SERIAL"))
        };
        let target = ConnectionTarget::from_identifiers(bluetooth_mac.as_deref(), serial.as_deref())?;

        let python = lookup("RADIACODE_PYTHON")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PYTHON.to_string());
        let sdk_path = lookup("RADIACODE_SDK_PATH")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let round_trip = RoundTrip {
            timeout: Duration::from_secs(number(
                &lookup,
                "RADIACODE_TIMEOUT_SECS",
                DEFAULT_TIMEOUT_SECS,
            )?),
            retries: number(&lookup, "RADIACODE_RETRIES", DEFAULT_RETRIES)?,
            ..RoundTrip::default()
        };
        if round_trip.timeout.is_zero() {
            return Err(SessionError::Configuration(
                "RADIACODE_TIMEOUT_SECS must be greater than zero".into(),
            ));
        }

        let connect_timeout = Duration::from_secs(number(
            &lookup,
            "RADIACODE_CONNECT_TIMEOUT_SECS",
            DEFAULT_CONNECT_TIMEOUT_SECS,
        )?);
        let ble_scan_duration = Duration::from_secs(number(
            &lookup,
            "RADIACODE_BLE_SCAN_SECS",
            DEFAULT_BLE_SCAN_SECS,
        )?);

        info!("Target device: {}", target);
        info!(
            "Round trip timeout {:?}, {} retries, bridge interpreter '{}'",
            round_trip.timeout, round_trip.retries, python
        );

        Ok(SessionConfig {
            target,
            python,
            sdk_path,
            connect_timeout,
            round_trip,
            ble_scan_duration,
        })
    }
}

fn number<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value.trim().parse().map_err(|_| {
            SessionError::Configuration(format!("{} must be a non-negative integer, got '{}'", key, value))
        }),
        _ => Ok(default),
    }
}
