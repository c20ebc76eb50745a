use crate::cache::CacheStore;
use crate::decode::ResponseDecoder;
use crate::dispatch::{LaneSnapshot, QueuePair};
use crate::request::{Expiry, RequestConfig};
use crate::telemetry::{self, LogEvent};
use crate::transport::Transport;
use crate::{Error, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::warn;

/// State shared by an executor and the operations it creates.
///
/// Operations only hold a `Weak` to this, for log attribution.
pub struct ExecutorShared {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) cache: Arc<CacheStore>,
    pub(crate) lanes: QueuePair,
    pub(crate) decoder: ResponseDecoder,
    /// Runtime on which callback completions are delivered.
    pub(crate) callbacks: Handle,
    pub(crate) accept_any_status: bool,
    pub(crate) log_tag: String,
}

impl ExecutorShared {
    pub fn log_tag(&self) -> &str {
        &self.log_tag
    }

    pub(crate) fn log_info(&self, message: impl Into<String>) {
        telemetry::emit(LogEvent::info(self.log_tag.clone(), message));
    }

    pub(crate) fn log_failure(&self, context: &str, err: &Error) {
        warn!(kind = err.kind().name(), code = err.code(), context, error = %err, "request failed");
        telemetry::emit(LogEvent::error(
            self.log_tag.clone(),
            format!("{}: {}", context, err),
            err.code(),
            err.kind().name(),
        ));
    }
}

/// Cache-aside HTTP executor.
///
/// Cloning is cheap and every clone drives the same cache, lanes and
/// transport. Build one per process (or per cache directory) and share it.
#[derive(Clone)]
pub struct RequestExecutor {
    pub(crate) shared: Arc<ExecutorShared>,
}

impl RequestExecutor {
    pub fn builder() -> crate::client::builder::RequestExecutorBuilder {
        crate::client::builder::RequestExecutorBuilder::new()
    }

    pub fn cache(&self) -> &CacheStore {
        &self.shared.cache
    }

    /// Snapshot of both lanes, primary first.
    pub fn lanes(&self) -> [LaneSnapshot; 2] {
        self.shared.lanes.snapshots()
    }

    pub fn transport_name(&self) -> &'static str {
        self.shared.transport.name()
    }

    /// Rewrites the expiry of the cache entry `config` maps to.
    ///
    /// Returns `Ok(false)` when no entry exists.
    pub async fn set_cache_expiry<T>(&self, config: &RequestConfig<T>, expiry: Expiry) -> Result<bool> {
        let request = config.prepare()?;
        let key = self.shared.cache.key_for(&request);
        let expires_at = expiry.resolve(Utc::now());
        let found = self.shared.cache.set_expiry(&key, expires_at).await?;
        if found {
            self.shared.log_info(format!("cache expiry for {} set to {}", key.short(), expires_at));
        }
        Ok(found)
    }
}
