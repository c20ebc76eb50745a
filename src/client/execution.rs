//! Request execution: cache lookup, lane dispatch, stale fallback, decode.

use crate::cache::{CacheKey, ResponseMetadata};
use crate::decode::Decodable;
use crate::dispatch::{FetchOutcome, Lane, Operation, OperationId};
use crate::error_code::TransportErrorCode;
use crate::request::RequestConfig;
use crate::transport::TransportError;
use crate::{Error, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::core::{ExecutorShared, RequestExecutor};

/// Where the payload being decoded came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Cache,
    Network,
    Stale,
}

impl Source {
    fn name(&self) -> &'static str {
        match self {
            Source::Cache => "cache",
            Source::Network => "network",
            Source::Stale => "stale",
        }
    }
}

impl RequestExecutor {
    /// Runs one request through the pipeline and resolves to exactly one result.
    ///
    /// A fresh cache entry short-circuits the network entirely. On a miss the
    /// fetch runs on the primary lane when `config` is main-priority, on the
    /// secondary lane otherwise. A failed fetch falls back to any cached entry
    /// for the same key, however old.
    pub async fn execute<T: Decodable>(&self, config: RequestConfig<T>) -> Result<T> {
        let shared = &self.shared;
        let started = Instant::now();

        let request = match config.prepare() {
            Ok(request) => request,
            Err(e) => {
                shared.log_failure("building request", &e);
                return Err(e);
            }
        };
        let key = shared.cache.key_for(&request);
        let lane = Lane::for_priority(config.is_main_priority());
        let (op, outcome_rx) = Operation::prepare(lane, Arc::downgrade(shared));

        match shared.cache.get(&key).await {
            Ok(Some(entry)) => {
                op.cancel();
                info!(
                    operation_id = %op.id(),
                    cache_key = key.short(),
                    url = request.url.as_str(),
                    "served from cache"
                );
                shared.log_info(format!("{} served {} from cache", op.id(), request.url));
                return shared.decode_payload(entry.payload, Source::Cache, op.id());
            }
            Ok(None) => {}
            Err(e) => {
                warn!(operation_id = %op.id(), cache_key = key.short(), error = %e, "cache read failed, treating as miss");
            }
        }

        debug!(operation_id = %op.id(), lane = lane.name(), url = request.url.as_str(), "dispatching fetch");
        let transport = shared.transport.clone();
        shared.lanes.get(lane).dispatch(Box::pin(op.clone().run(transport, request)));

        let outcome = outcome_rx.await.unwrap_or_else(|_| {
            Err(TransportError::other(TransportErrorCode::Unknown, "fetch abandoned before completion"))
        });
        let result = shared.settle(&config, &key, op.id(), outcome).await;

        info!(
            operation_id = %op.id(),
            lane = lane.name(),
            ok = result.is_ok(),
            duration_ms = started.elapsed().as_millis() as u64,
            "request finished"
        );
        result
    }

    /// Callback flavour of [`execute`](Self::execute).
    ///
    /// Returns immediately. `completion` runs exactly once, on the executor's
    /// callback runtime, whatever path the request takes. `T` only needs to
    /// be `Send`; the pipeline never shares a decoded value across an await.
    pub fn execute_with<T, F>(&self, config: RequestConfig<T>, completion: F) -> JoinHandle<()>
    where
        T: Decodable,
        F: FnOnce(Result<T>) + Send + 'static,
    {
        let this = self.clone();
        self.shared.callbacks.spawn(async move {
            let result = this.execute(config).await;
            completion(result);
        })
    }
}

impl ExecutorShared {
    /// Applies failure policy, decodes, and writes through the cache.
    async fn settle<T: Decodable>(
        &self,
        config: &RequestConfig<T>,
        key: &CacheKey,
        op_id: OperationId,
        outcome: FetchOutcome,
    ) -> Result<T> {
        let failure = match outcome {
            Ok(resp) if resp.is_success() || self.accept_any_status => {
                let metadata = resp.metadata();
                let value: T = self.decode_payload(resp.body.clone(), Source::Network, op_id)?;
                if config.is_auto_cache() {
                    // Only the hint crosses the await; `T` need not be `Sync`.
                    let hint = value.caching_ends_at();
                    self.write_through(config, key, hint, resp.body, metadata).await;
                }
                return Ok(value);
            }
            Ok(resp) => {
                let reason = reqwest::StatusCode::from_u16(resp.status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("unexpected status");
                Error::network(
                    TransportErrorCode::from_http_status(resp.status).code(),
                    format!("HTTP {} {}", resp.status, reason),
                )
            }
            Err(e) => Error::network(e.code().code(), e.to_string()),
        };

        match self.cache.get_forced(key).await {
            Ok(Some(entry)) => {
                let age_s = (Utc::now() - entry.expires_at).num_seconds();
                warn!(
                    operation_id = %op_id,
                    cache_key = key.short(),
                    expired_for_s = age_s,
                    error = %failure,
                    "network failed, serving stale cache entry"
                );
                self.log_info(format!("{} network failed ({}), serving stale entry", op_id, failure));
                self.decode_payload(entry.payload, Source::Stale, op_id)
            }
            Ok(None) => {
                self.log_failure(&op_id.to_string(), &failure);
                Err(failure)
            }
            Err(e) => {
                warn!(operation_id = %op_id, error = %e, "stale lookup failed");
                self.log_failure(&op_id.to_string(), &failure);
                Err(failure)
            }
        }
    }

    fn decode_payload<T: Decodable>(&self, payload: Bytes, source: Source, op_id: OperationId) -> Result<T> {
        if payload.is_empty() {
            let err = Error::EmptyPayload;
            self.log_failure(&format!("{} ({})", op_id, source.name()), &err);
            return Err(err);
        }
        self.decoder.decode::<T>(&payload).map_err(|e| {
            let err = Error::from(e);
            self.log_failure(&format!("{} ({})", op_id, source.name()), &err);
            err
        })
    }

    /// Stores a freshly fetched payload. The decoded value's own hint wins over
    /// the configured caching time; with neither, nothing is written.
    async fn write_through<T>(
        &self,
        config: &RequestConfig<T>,
        key: &CacheKey,
        hint: Option<DateTime<Utc>>,
        payload: Bytes,
        metadata: ResponseMetadata,
    ) {
        let now = Utc::now();
        let Some(expires_at) = hint.or_else(|| config.expiry().map(|e| e.resolve(now)))
        else {
            debug!(cache_key = key.short(), "auto-cache requested without expiry, not stored");
            return;
        };

        match self.cache.put(key, payload, metadata, expires_at).await {
            Ok(()) => {
                debug!(cache_key = key.short(), %expires_at, "response cached");
                self.log_info(format!("cached {} until {}", key.short(), expires_at));
            }
            Err(e) => {
                let err = Error::from(e);
                self.log_failure("cache write", &err);
            }
        }
    }
}
