//! Shared fixtures for executor integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use cachelane::error_code::TransportErrorCode;
use cachelane::request::PreparedRequest;
use cachelane::transport::{FetchedResponse, Transport, TransportError};
use cachelane::{CacheConfig, LaneConfig, RequestExecutor};
use reqwest::header::HeaderMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type Script = Box<dyn Fn(&PreparedRequest) -> Result<FetchedResponse, TransportError> + Send + Sync>;

/// Transport that answers from a closure and records how it was used.
pub struct ScriptedTransport {
    script: Script,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&PreparedRequest) -> Result<FetchedResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Always answers `status` with `body`.
    pub fn respond(status: u16, body: &'static [u8]) -> Self {
        Self::new(move |req| Ok(response(req, status, Bytes::from_static(body))))
    }

    /// Always fails as if the peer reset the connection.
    pub fn unreachable() -> Self {
        Self::new(|_| Err(TransportError::other(TransportErrorCode::ConnectionLost, "connection reset by peer")))
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of fetches observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(&self, request: PreparedRequest) -> Result<FetchedResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let outcome = (self.script)(&request);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub fn response(req: &PreparedRequest, status: u16, body: Bytes) -> FetchedResponse {
    FetchedResponse {
        status,
        url: req.url.to_string(),
        headers: HeaderMap::new(),
        body,
    }
}

/// Executor over `transport` with its disk cache in `dir`.
pub async fn executor(dir: &Path, transport: Arc<ScriptedTransport>) -> RequestExecutor {
    RequestExecutor::builder()
        .transport(transport)
        .cache_config(CacheConfig::new().with_directory(dir))
        .lane_config(LaneConfig::default().with_secondary_concurrency(4))
        .log_tag("test")
        .build()
        .await
        .expect("executor builds")
}
