/// Out-of-process access to the vendor SDK over a JSON-lines pipe
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;

use super::{Query, Reply, Transport};
use crate::config::ConnectionTarget;
use crate::error::{SessionError, TransportError};
use crate::models::{BufferedSample, Spectrum};
use crate::utils::parse_device_time;

const HELPER_SOURCE: &str = include_str!("../../bridge/radiacode_bridge.py");
const DEVICE_NOT_FOUND: &str = "not_found";

#[derive(Debug, Serialize)]
struct WireRequest {
    id: u64,
    op: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    bluetooth_mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    serial_number: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireReply {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireSample {
    kind: String,
    dt: String,
    dose_rate: Option<f64>,
    count_rate: Option<f64>,
    dose_rate_err: Option<f64>,
    temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireSpectrum {
    duration_secs: f64,
    a0: f64,
    a1: f64,
    a2: f64,
    counts: Vec<u32>,
}

/// A bridge helper child process connected to one detector.
pub struct BridgeTransport {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
    /// Request written but not yet answered, kept across timeouts.
    pending: Option<(u64, &'static str)>,
    /// Set while a request line is being written.
    write_interrupted: bool,
    released: bool,
}

impl BridgeTransport {
    /// Spawn the helper with `python` and connect it to `target`
    ///
    /// `sdk_path` is prepended to the helper's `PYTHONPATH`. Any failure after
    /// the helper started releases it before returning.
    pub async fn open(
        python: &str,
        sdk_path: Option<&Path>,
        target: &ConnectionTarget,
        connect_timeout: Duration,
    ) -> Result<Self, SessionError> {
        let mut command = Command::new(python);
        command.arg("-u").arg("-c").arg(HELPER_SOURCE);
        if let Some(path) = sdk_path {
            let python_path = match std::env::var_os("PYTHONPATH") {
                Some(existing) if !existing.is_empty() => {
                    let mut joined = path.as_os_str().to_os_string();
                    joined.push(":");
                    joined.push(existing);
                    joined
                }
                _ => path.as_os_str().to_os_string(),
            };
            command.env("PYTHONPATH", python_path);
        }

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SessionError::Connection(format!(
                    "Failed to start bridge helper with '{}': {}",
                    python, e
                ))
            })?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::Connection("Bridge helper has no stdout".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }

        let mut transport = BridgeTransport {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 1,
            pending: None,
            write_interrupted: false,
            released: false,
        };

        let (bluetooth_mac, serial_number) = match target {
            ConnectionTarget::Bluetooth(address) => (Some(address.to_string()), None),
            ConnectionTarget::Serial(serial) => (None, Some(serial.clone())),
        };

        info!("Opening {} through bridge helper", target);
        let handshake = timeout(
            connect_timeout,
            transport.round_trip("open", bluetooth_mac, serial_number),
        )
        .await;
        match handshake {
            Ok(Ok(_)) => {
                info!("Connected to {}", target);
                Ok(transport)
            }
            Ok(Err(TransportError::Device { kind, message })) if kind == DEVICE_NOT_FOUND => {
                Err(SessionError::Connection(format!(
                    "Device not found ({}): {}",
                    target, message
                )))
            }
            Ok(Err(e)) => Err(SessionError::Connection(format!(
                "Could not open {}: {}",
                target, e
            ))),
            Err(_) => Err(SessionError::Connection(format!(
                "No answer from {} within {:?}",
                target, connect_timeout
            ))),
        }
    }

    async fn round_trip(
        &mut self,
        op: &'static str,
        bluetooth_mac: Option<String>,
        serial_number: Option<String>,
    ) -> Result<Value, TransportError> {
        // A cancelled write may have left half a request in the pipe
        if self.write_interrupted {
            warn!("Request write was interrupted, closing bridge helper");
            self.release()?;
            return Err(TransportError::Closed);
        }

        // Re-sending a draining op like data_buf would lose what the helper
        // is about to return, so wait for the earlier reply instead.
        let id = match self.pending {
            Some((id, pending_op)) if pending_op == op => {
                debug!("Still waiting for request {} ({})", id, op);
                id
            }
            _ => {
                let id = self.next_id;
                self.next_id += 1;

                let stdin = self.stdin.as_mut().ok_or(TransportError::Closed)?;
                let mut line = serde_json::to_string(&WireRequest {
                    id,
                    op,
                    bluetooth_mac,
                    serial_number,
                })?;
                line.push('\n');
                self.write_interrupted = true;
                stdin.write_all(line.as_bytes()).await?;
                stdin.flush().await?;
                self.write_interrupted = false;
                self.pending = Some((id, op));
                debug!("Sent request {} ({})", id, op);
                id
            }
        };

        loop {
            let line = self
                .stdout
                .next_line()
                .await?
                .ok_or(TransportError::Closed)?;
            if let Some(result) = match_reply(&line, id) {
                self.pending = None;
                return result;
            }
        }
    }
}

/// Decode one line of helper output against the id we are waiting for.
///
/// `None` means the line is not our reply and should be skipped: non-JSON
/// output or a late reply to a request that already timed out.
fn match_reply(line: &str, expected_id: u64) -> Option<Result<Value, TransportError>> {
    let reply: WireReply = match serde_json::from_str(line) {
        Ok(reply) => reply,
        Err(_) => {
            debug!("Skipping non-protocol helper output: {}", line);
            return None;
        }
    };

    if reply.id < expected_id {
        debug!("Discarding stale reply {}", reply.id);
        return None;
    }
    if reply.id > expected_id {
        return Some(Err(TransportError::Protocol(format!(
            "reply id {} is ahead of request {}",
            reply.id, expected_id
        ))));
    }

    if reply.ok {
        Some(Ok(reply.result))
    } else {
        Some(Err(TransportError::Device {
            kind: reply.kind.unwrap_or_else(|| "device".to_string()),
            message: reply.error.unwrap_or_default(),
        }))
    }
}

fn decode_samples(result: Value) -> Result<Vec<BufferedSample>, TransportError> {
    let wire: Vec<WireSample> = serde_json::from_value(result)?;
    wire.into_iter()
        .map(|sample| {
            let timestamp = parse_device_time(&sample.dt).map_err(|e| {
                TransportError::Protocol(format!("bad sample time '{}': {}", sample.dt, e))
            })?;
            Ok(BufferedSample {
                kind: sample.kind,
                timestamp,
                dose_rate: sample.dose_rate,
                count_rate: sample.count_rate,
                dose_rate_err: sample.dose_rate_err,
                temperature: sample.temperature,
            })
        })
        .collect()
}

fn decode_configuration(result: Value) -> Result<String, TransportError> {
    match result {
        Value::String(text) => Ok(text),
        other => Err(TransportError::Protocol(format!(
            "configuration is not text: {}",
            other
        ))),
    }
}

fn decode_spectrum(result: Value) -> Result<Spectrum, TransportError> {
    let wire: WireSpectrum = serde_json::from_value(result)?;
    let duration = Duration::try_from_secs_f64(wire.duration_secs).map_err(|e| {
        TransportError::Protocol(format!("bad spectrum duration {}: {}", wire.duration_secs, e))
    })?;
    Ok(Spectrum {
        duration,
        a0: wire.a0,
        a1: wire.a1,
        a2: wire.a2,
        counts: wire.counts,
    })
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("bridge: {}", line);
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    async fn request(&mut self, query: Query) -> Result<Reply, TransportError> {
        let result = self.round_trip(query.op(), None, None).await?;
        match query {
            Query::DataBuffer => decode_samples(result).map(Reply::Samples),
            Query::Configuration => decode_configuration(result).map(Reply::Configuration),
            Query::Spectrum => decode_spectrum(result).map(Reply::Spectrum),
        }
    }

    fn release(&mut self) -> Result<(), TransportError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        // EOF on stdin ends the helper's request loop; the kill covers a
        // helper stuck inside an SDK call.
        drop(self.stdin.take());
        match self.child.try_wait()? {
            Some(status) => debug!("Bridge helper already exited: {}", status),
            None => self.child.start_kill()?,
        }
        info!("Bridge helper released");
        Ok(())
    }
}

impl Drop for BridgeTransport {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to release bridge helper: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoundTrip;
    use crate::session::DeviceSession;
    use crate::transport::fake_sdk::{
        python_available, FakeSdk, ABSENT, HANGING_OPEN, HEALTHY, SLOW_DRAINING_BUFFER,
    };
    use serde_json::json;
    use time::macros::datetime;

    fn serial() -> ConnectionTarget {
        ConnectionTarget::Serial("RC-102-000123".into())
    }

    async fn open_fake(sdk: &FakeSdk) -> BridgeTransport {
        BridgeTransport::open("python3", Some(sdk.path()), &serial(), Duration::from_secs(10))
            .await
            .unwrap()
    }

    #[test]
    fn test_request_encoding_omits_absent_identifiers() {
        let line = serde_json::to_string(&WireRequest {
            id: 3,
            op: "open",
            bluetooth_mac: Some("52:43:06:60:0D:0D".into()),
            serial_number: None,
        })
        .unwrap();
        assert_eq!(
            line,
            r#"{"id":3,"op":"open","bluetooth_mac":"52:43:06:60:0D:0D"}"#
        );
    }

    #[test]
    fn test_match_reply_ok() {
        let result = match_reply(r#"{"id":4,"ok":true,"result":"SerialNumber=1"}"#, 4)
            .unwrap()
            .unwrap();
        assert_eq!(result, json!("SerialNumber=1"));
    }

    #[test]
    fn test_match_reply_skips_stale_and_noise() {
        assert!(match_reply(r#"{"id":2,"ok":true,"result":[]}"#, 3).is_none());
        assert!(match_reply("Connecting to RadiaCode...", 3).is_none());
    }

    #[test]
    fn test_match_reply_ahead_is_protocol_error() {
        let err = match_reply(r#"{"id":9,"ok":true}"#, 3).unwrap().unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)));
    }

    #[test]
    fn test_match_reply_error_maps_to_device_error() {
        let err = match_reply(
            r#"{"id":1,"ok":false,"kind":"not_found","error":"Device not found"}"#,
            1,
        )
        .unwrap()
        .unwrap_err();
        match err {
            TransportError::Device { kind, message } => {
                assert_eq!(kind, "not_found");
                assert_eq!(message, "Device not found");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_decode_samples() {
        let samples = decode_samples(json!([
            {"kind": "RareData", "dt": "2024-05-02T10:15:00", "temperature": 23.5},
            {"kind": "RealTimeData", "dt": "2024-05-02T10:15:01",
             "dose_rate": 1.2e-5, "count_rate": 5.5, "dose_rate_err": 14.0}
        ]))
        .unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].kind, "RareData");
        assert_eq!(samples[0].temperature, Some(23.5));
        assert_eq!(samples[0].dose_rate, None);
        assert_eq!(samples[1].timestamp, datetime!(2024-05-02 10:15:01));
        assert_eq!(samples[1].count_rate, Some(5.5));
    }

    #[test]
    fn test_decode_samples_bad_time() {
        let err = decode_samples(json!([{"kind": "RawData", "dt": "yesterday"}])).unwrap_err();
        assert!(err.to_string().contains("bad sample time"));
    }

    #[test]
    fn test_decode_spectrum() {
        let spectrum = decode_spectrum(json!({
            "duration_secs": 120.0, "a0": -5.0, "a1": 2.4, "a2": 0.0004,
            "counts": [0, 3, 7, 1]
        }))
        .unwrap();
        assert_eq!(spectrum.duration, Duration::from_secs(120));
        assert_eq!(spectrum.counts, vec![0, 3, 7, 1]);
    }

    #[test]
    fn test_decode_spectrum_rejects_negative_counts() {
        assert!(decode_spectrum(json!({
            "duration_secs": 1.0, "a0": 0.0, "a1": 1.0, "a2": 0.0, "counts": [1, -2]
        }))
        .is_err());
    }

    #[test]
    fn test_decode_configuration_requires_text() {
        assert_eq!(
            decode_configuration(json!("SerialNumber=RC")).unwrap(),
            "SerialNumber=RC"
        );
        assert!(decode_configuration(json!(42)).is_err());
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_connection_error() {
        let err = BridgeTransport::open(
            "/nonexistent/bin/python3",
            None,
            &serial(),
            Duration::from_secs(1),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, SessionError::Connection(_)));
        assert!(err.to_string().contains("Failed to start bridge helper"));
    }

    #[tokio::test]
    async fn test_absent_device_is_connection_error() {
        if !python_available() {
            return;
        }
        let sdk = FakeSdk::new(ABSENT);
        let err = BridgeTransport::open("python3", Some(sdk.path()), &serial(), Duration::from_secs(10))
            .await
            .err()
            .unwrap();
        match err {
            SessionError::Connection(message) => {
                assert!(message.contains("Device not found"));
                assert!(message.contains("no RadiaCode on USB"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handshake_timeout_is_connection_error() {
        if !python_available() {
            return;
        }
        let sdk = FakeSdk::new(HANGING_OPEN);
        let err = BridgeTransport::open(
            "python3",
            Some(sdk.path()),
            &serial(),
            Duration::from_millis(500),
        )
        .await
        .err()
        .unwrap();
        match err {
            SessionError::Connection(message) => assert!(message.contains("No answer")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_round_trips_through_helper() {
        if !python_available() {
            return;
        }
        let sdk = FakeSdk::new(HEALTHY);
        let mut transport = open_fake(&sdk).await;

        let samples = transport
            .request(Query::DataBuffer)
            .await
            .unwrap()
            .into_samples()
            .unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].kind, "RareData");
        assert_eq!(samples[0].temperature, Some(23.5));
        assert_eq!(samples[1].timestamp, datetime!(2024-05-02 10:15:01));
        assert_eq!(samples[1].dose_rate, Some(1.2e-5));

        let configuration = transport
            .request(Query::Configuration)
            .await
            .unwrap()
            .into_configuration()
            .unwrap();
        assert!(configuration.contains("SerialNumber=RC-102-000123"));

        let spectrum = transport
            .request(Query::Spectrum)
            .await
            .unwrap()
            .into_spectrum()
            .unwrap();
        assert_eq!(spectrum.counts, vec![0, 3, 7, 1]);
        assert_eq!(spectrum.duration, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_release_twice_is_noop() {
        if !python_available() {
            return;
        }
        let sdk = FakeSdk::new(HEALTHY);
        let mut transport = open_fake(&sdk).await;

        transport.release().unwrap();
        transport.release().unwrap();
        assert!(transport.released);
        assert!(matches!(
            transport.request(Query::Configuration).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_interrupted_write_closes_helper() {
        if !python_available() {
            return;
        }
        let sdk = FakeSdk::new(HEALTHY);
        let mut transport = open_fake(&sdk).await;

        // As left behind by a request cancelled halfway through its write
        transport.write_interrupted = true;

        assert!(matches!(
            transport.request(Query::Spectrum).await,
            Err(TransportError::Closed)
        ));
        assert!(transport.released);
        assert!(transport.stdin.is_none());
    }

    #[tokio::test]
    async fn test_timed_out_request_is_awaited_not_resent() {
        if !python_available() {
            return;
        }
        let sdk = FakeSdk::new(SLOW_DRAINING_BUFFER);
        let mut transport = open_fake(&sdk).await;

        let first = timeout(Duration::from_millis(200), transport.request(Query::DataBuffer)).await;
        assert!(first.is_err());
        let pending = transport.pending;
        assert!(matches!(pending, Some((_, "data_buf"))));

        let samples = transport
            .request(Query::DataBuffer)
            .await
            .unwrap()
            .into_samples()
            .unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(transport.pending, None);
        // No second data_buf went out
        assert_eq!(transport.next_id, pending.unwrap().0 + 1);
    }

    #[tokio::test]
    async fn test_slow_buffer_read_survives_session_retry() {
        if !python_available() {
            return;
        }
        let sdk = FakeSdk::new(SLOW_DRAINING_BUFFER);
        let transport = open_fake(&sdk).await;
        let mut session = DeviceSession::with_transport(
            serial(),
            Box::new(transport),
            RoundTrip {
                timeout: Duration::from_secs(1),
                retries: 1,
                retry_delay: Duration::from_millis(10),
            },
        );

        let snapshot = session.fetch_snapshot().await.unwrap();
        assert_eq!(snapshot.temperature(), Some(23.5));
        assert_eq!(snapshot.counts_per_second(), 5.5);
        assert_eq!(snapshot.serial_number(), "RC-102-000123");
        assert_eq!(snapshot.spectrum_counts(), &[0, 3, 7, 1]);
        session.close();
    }
}
