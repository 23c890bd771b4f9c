//! A connection to one detector and the snapshot it produces.
//!
//! `DeviceSession` owns its transport exclusively. Every round trip is
//! bounded by `RoundTrip::timeout`; transient failures are retried up to
//! `RoundTrip::retries` times before surfacing as
//! `SessionError::DeviceCommunication` naming the failed step.
//!
//! The transport is released exactly once: by [`DeviceSession::close`] or,
//! failing that, when the session is dropped.

use log::{debug, info, warn};
use tokio::time::{sleep, timeout};

use crate::bluetooth::ensure_reachable;
use crate::config::{ConnectionTarget, RoundTrip, SessionConfig};
use crate::error::{Result, SessionError, TransportError};
use crate::models::{BufferedSample, RadiationSnapshot};
use crate::transport::{BridgeTransport, Query, Reply, Transport};
use crate::utils::{latest_temperature, native_to_usv_h, parse_serial_number};

pub struct DeviceSession {
    target: ConnectionTarget,
    transport: Option<Box<dyn Transport>>,
    round_trip: RoundTrip,
}

impl DeviceSession {
    /// Open a session through the bridge helper.
    pub async fn connect(config: &SessionConfig) -> Result<Self> {
        if let ConnectionTarget::Bluetooth(address) = &config.target {
            if config.ble_scan_duration.is_zero() {
                debug!("Bluetooth presence check disabled");
            } else {
                ensure_reachable(*address, config.ble_scan_duration).await?;
            }
        }

        let transport = BridgeTransport::open(
            &config.python,
            config.sdk_path.as_deref(),
            &config.target,
            config.connect_timeout,
        )
        .await?;
        Ok(Self::with_transport(
            config.target.clone(),
            Box::new(transport),
            config.round_trip,
        ))
    }

    pub fn with_transport(
        target: ConnectionTarget,
        transport: Box<dyn Transport>,
        round_trip: RoundTrip,
    ) -> Self {
        Self {
            target,
            transport: Some(transport),
            round_trip,
        }
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Read the current state of the device.
    ///
    /// Fails with `NoData` when the data buffer is empty. Dose rate, count
    /// rate and error come from the last buffered sample; the temperature
    /// from the most recent sample that has one (`NaN` if none does).
    pub async fn fetch_snapshot(&mut self) -> Result<RadiationSnapshot> {
        let samples = self
            .query(Query::DataBuffer)
            .await?
            .into_samples()
            .map_err(|e| SessionError::communication(Query::DataBuffer, e))?;
        let latest = samples.last().ok_or(SessionError::NoData)?;
        debug!("{} buffered samples, latest is {}", samples.len(), latest.kind);

        let dose_rate = mandatory(latest, "dose rate", latest.dose_rate)?;
        let count_rate = mandatory(latest, "count rate", latest.count_rate)?;
        let dose_rate_err = mandatory(latest, "dose rate error", latest.dose_rate_err)?;

        let configuration = self
            .query(Query::Configuration)
            .await?
            .into_configuration()
            .map_err(|e| SessionError::communication(Query::Configuration, e))?;
        let serial_number = parse_serial_number(&configuration);
        if serial_number.is_empty() {
            debug!("Device configuration has no serial number");
        }

        let spectrum = self
            .query(Query::Spectrum)
            .await?
            .into_spectrum()
            .map_err(|e| SessionError::communication(Query::Spectrum, e))?;

        let temperature = latest_temperature(&samples).unwrap_or(f64::NAN);

        Ok(RadiationSnapshot::new(
            native_to_usv_h(dose_rate),
            count_rate,
            dose_rate_err,
            latest.timestamp,
            serial_number,
            spectrum.counts,
            temperature,
        ))
    }

    async fn query(&mut self, query: Query) -> Result<Reply> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| SessionError::communication(query, TransportError::Closed))?;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let outcome = match timeout(self.round_trip.timeout, transport.request(query)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(TransportError::Timeout(self.round_trip.timeout)),
            };

            match outcome {
                Ok(reply) => {
                    debug!("Read {} on attempt {}", query, attempt);
                    return Ok(reply);
                }
                Err(e) if e.is_transient() && attempt <= self.round_trip.retries => {
                    warn!("Attempt {} to read {} failed: {}", attempt, query, e);
                    sleep(self.round_trip.retry_delay).await;
                }
                Err(e) => return Err(SessionError::communication(query, e)),
            }
        }
    }

    /// Release the transport. Later calls do nothing.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            match transport.release() {
                Ok(()) => info!("Closed session to {}", self.target),
                Err(e) => warn!("Failed to release connection to {}: {}", self.target, e),
            }
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn mandatory(sample: &BufferedSample, name: &str, value: Option<f64>) -> Result<f64> {
    let problem = match value {
        Some(v) if v.is_finite() && v >= 0.0 => return Ok(v),
        Some(v) => format!("latest {} sample has invalid {} {}", sample.kind, name, v),
        None => format!("latest {} sample carries no {}", sample.kind, name),
    };
    Err(SessionError::communication(
        Query::DataBuffer,
        TransportError::Protocol(problem),
    ))
}
