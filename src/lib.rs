//! Read radiation telemetry and spectra from a RadiaCode detector.
//!
//! Device I/O goes through a [`transport::Transport`]. The default
//! [`transport::BridgeTransport`] runs a small helper process that owns the
//! vendor SDK and speaks newline-delimited JSON.

pub mod bluetooth;
pub mod config;
pub mod error;
pub mod models;
pub mod report;
pub mod session;
pub mod transport;
pub mod utils;

pub use config::{ConnectionTarget, RoundTrip, SessionConfig};
pub use error::{Result, SessionError, TransportError};
pub use models::{BufferedSample, RadiationSnapshot, Spectrum};
pub use session::DeviceSession;
