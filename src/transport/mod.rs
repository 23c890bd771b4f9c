//! Request/response access to a detector.
//!
//! A [`Transport`] answers one [`Query`] per round trip. Timeouts and retries
//! are applied by the session, so implementations only move bytes and decode
//! replies.

pub mod bridge;
#[cfg(test)]
mod fake_sdk;
pub mod mock;

pub use bridge::BridgeTransport;
pub use mock::MockTransport;

use async_trait::async_trait;
use std::fmt;

use crate::error::TransportError;
use crate::models::{BufferedSample, Spectrum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Query {
    DataBuffer,
    Configuration,
    Spectrum,
}

impl Query {
    /// Operation name on the bridge protocol.
    pub fn op(&self) -> &'static str {
        match self {
            Query::DataBuffer => "data_buf",
            Query::Configuration => "configuration",
            Query::Spectrum => "spectrum",
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Query::DataBuffer => "data buffer",
            Query::Configuration => "configuration",
            Query::Spectrum => "spectrum",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Samples(Vec<BufferedSample>),
    Configuration(String),
    Spectrum(Spectrum),
}

impl Reply {
    fn variant(&self) -> &'static str {
        match self {
            Reply::Samples(_) => "samples",
            Reply::Configuration(_) => "configuration",
            Reply::Spectrum(_) => "spectrum",
        }
    }

    pub fn into_samples(self) -> Result<Vec<BufferedSample>, TransportError> {
        match self {
            Reply::Samples(samples) => Ok(samples),
            other => Err(unexpected(Query::DataBuffer, &other)),
        }
    }

    pub fn into_configuration(self) -> Result<String, TransportError> {
        match self {
            Reply::Configuration(text) => Ok(text),
            other => Err(unexpected(Query::Configuration, &other)),
        }
    }

    pub fn into_spectrum(self) -> Result<Spectrum, TransportError> {
        match self {
            Reply::Spectrum(spectrum) => Ok(spectrum),
            other => Err(unexpected(Query::Spectrum, &other)),
        }
    }
}

fn unexpected(query: Query, reply: &Reply) -> TransportError {
    TransportError::Protocol(format!(
        "expected a {} reply, got {}",
        query,
        reply.variant()
    ))
}

/// A connection to one detector, exclusively owned by a session.
#[async_trait]
pub trait Transport: Send {
    async fn request(&mut self, query: Query) -> Result<Reply, TransportError>;

    /// Release the underlying connection. Must not block.
    fn release(&mut self) -> Result<(), TransportError>;
}
