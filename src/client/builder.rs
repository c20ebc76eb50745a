use crate::cache::{CacheConfig, CacheStore};
use crate::client::core::{ExecutorShared, RequestExecutor};
use crate::decode::ResponseDecoder;
use crate::dispatch::{LaneConfig, QueuePair};
use crate::transport::{HttpTransport, Transport};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::info;

/// Builder for creating executors with custom configuration.
///
/// Keep this surface area small and predictable. Every knob has a default
/// and most can also be set through env (see [`CacheConfig::from_env`] and
/// [`LaneConfig::from_env`]).
pub struct RequestExecutorBuilder {
    transport: Option<Arc<dyn Transport>>,
    cache: Option<Arc<CacheStore>>,
    cache_config: CacheConfig,
    lane_config: LaneConfig,
    lanes: Option<QueuePair>,
    runtime: Option<Handle>,
    accept_any_status: bool,
    log_tag: String,
}

impl RequestExecutorBuilder {
    pub fn new() -> Self {
        Self {
            transport: None,
            cache: None,
            cache_config: CacheConfig::from_env(),
            lane_config: LaneConfig::from_env(),
            lanes: None,
            runtime: None,
            accept_any_status: false,
            log_tag: "RequestExecutor".to_string(),
        }
    }

    /// Inject a transport. Default is [`HttpTransport`].
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use an already opened cache store (e.g. shared between executors).
    pub fn cache_store(mut self, cache: Arc<CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    pub fn lane_config(mut self, config: LaneConfig) -> Self {
        self.lane_config = config;
        self
    }

    /// Replace the default semaphore lanes.
    pub fn lanes(mut self, lanes: QueuePair) -> Self {
        self.lanes = Some(lanes);
        self
    }

    /// Runtime that runs lane jobs and delivers `execute_with` completions.
    /// Defaults to the runtime `build` is called from.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Treat non-2xx responses as successful payloads instead of network
    /// failures. Off by default, so error statuses trigger stale fallback.
    pub fn accept_any_status(mut self, accept: bool) -> Self {
        self.accept_any_status = accept;
        self
    }

    /// Caller tag attached to listener events.
    pub fn log_tag(mut self, tag: impl Into<String>) -> Self {
        self.log_tag = tag.into();
        self
    }

    pub async fn build(self) -> Result<RequestExecutor> {
        let runtime = match self.runtime {
            Some(h) => h,
            None => Handle::try_current().map_err(|_| {
                Error::configuration("no tokio runtime available; call build inside a runtime or set one", "runtime")
            })?,
        };

        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::new().map_err(|e| {
                Error::configuration(format!("HTTP transport setup failed: {}", e), "transport")
            })?),
        };

        let cache = match self.cache {
            Some(c) => c,
            None => Arc::new(CacheStore::open(self.cache_config).await?),
        };

        let lanes = self
            .lanes
            .unwrap_or_else(|| QueuePair::new(&self.lane_config, runtime.clone()));

        let [primary, secondary] = lanes.snapshots();
        info!(
            transport = transport.name(),
            cache_enabled = cache.config().enabled,
            disk_capacity = cache.config().disk_capacity,
            memory_capacity = cache.config().memory_capacity,
            primary_concurrency = primary.max_concurrency,
            secondary_concurrency = secondary.max_concurrency,
            "request executor ready"
        );

        Ok(RequestExecutor {
            shared: Arc::new(ExecutorShared {
                transport,
                cache,
                lanes,
                decoder: ResponseDecoder::new(),
                callbacks: runtime,
                accept_any_status: self.accept_any_status,
                log_tag: self.log_tag,
            }),
        })
    }
}

impl Default for RequestExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
