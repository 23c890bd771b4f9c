//! Error types for the detector session and its transports.
//!
//! `SessionError` is what callers of [`crate::session::DeviceSession`] see.
//! Transport implementations report `TransportError`, which the session wraps
//! into `SessionError::DeviceCommunication` together with the step that failed.

use std::time::Duration;
use thiserror::Error;

use crate::transport::Query;

/// Convenience alias for results using the session error type.
pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Device communication failed while reading {step}: {source}")]
    DeviceCommunication {
        step: Query,
        #[source]
        source: TransportError,
    },

    #[error("Device reported no buffered samples")]
    NoData,
}

impl SessionError {
    pub(crate) fn communication(step: Query, source: TransportError) -> Self {
        SessionError::DeviceCommunication { step, source }
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No reply within {0:?}")]
    Timeout(Duration),

    #[error("Transport is closed")]
    Closed,

    #[error("Malformed reply: {0}")]
    Protocol(String),

    #[error("Device error ({kind}): {message}")]
    Device { kind: String, message: String },
}

impl TransportError {
    /// Errors worth another attempt on the same connection.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Timeout(_) | TransportError::Device { .. })
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Protocol(e.to_string())
    }
}
