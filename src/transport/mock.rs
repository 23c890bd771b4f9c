//! In-memory transport with scripted replies.
use async_trait::async_trait;
use log::debug;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{Query, Reply, Transport};
use crate::error::TransportError;
use crate::models::{BufferedSample, Spectrum};

pub struct MockTransport {
    samples: Vec<BufferedSample>,
    configuration: String,
    spectrum: Spectrum,
    failures: HashMap<Query, VecDeque<TransportError>>,
    stalled: Vec<Query>,
    requests: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new(samples: Vec<BufferedSample>, configuration: &str, spectrum: Spectrum) -> Self {
        Self {
            samples,
            configuration: configuration.to_string(),
            spectrum,
            failures: HashMap::new(),
            stalled: Vec::new(),
            requests: Arc::new(AtomicUsize::new(0)),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail the next request for `query` with `error`. Queued failures are
    /// consumed in order before the scripted reply is returned.
    pub fn fail_next(mut self, query: Query, error: TransportError) -> Self {
        self.failures.entry(query).or_default().push_back(error);
        self
    }

    /// Never answer `query`.
    pub fn stall(mut self, query: Query) -> Self {
        self.stalled.push(query);
        self
    }

    /// Counter of `release` calls that reached the mock.
    pub fn release_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.releases)
    }

    /// Counter of requests received, including failed ones.
    pub fn request_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.requests)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(&mut self, query: Query) -> Result<Reply, TransportError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        debug!("Mock request: {}", query);

        if self.stalled.contains(&query) {
            std::future::pending::<()>().await;
        }
        if let Some(error) = self.failures.get_mut(&query).and_then(VecDeque::pop_front) {
            return Err(error);
        }

        Ok(match query {
            Query::DataBuffer => Reply::Samples(self.samples.clone()),
            Query::Configuration => Reply::Configuration(self.configuration.clone()),
            Query::Spectrum => Reply::Spectrum(self.spectrum.clone()),
        })
    }

    fn release(&mut self) -> Result<(), TransportError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
