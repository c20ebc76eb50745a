//! # cachelane
//!
//! Cache-aside HTTP execution layer: one request pipeline that checks a
//! response cache, dispatches misses on priority lanes, falls back to stale
//! cache entries when the network fails, and decodes responses into typed
//! values through a binary-then-JSON decode chain.
//!
//! ## Overview
//!
//! Every call to [`RequestExecutor::execute`] produces exactly one
//! [`Result`], whichever path it takes:
//!
//! - **Cache hit**: the prepared fetch is cancelled before it starts and the
//!   cached bytes are decoded. No lane is touched.
//! - **Cache miss**: the fetch is wrapped in an [`Operation`](dispatch::Operation)
//!   and run on the primary (serial) or secondary (bounded parallel) lane.
//! - **Network failure**: a stale entry (expired or not) is served if one
//!   exists, otherwise [`Error::NetworkFailure`] is returned.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cachelane::{Json, RequestConfig, RequestExecutor};
//! use std::time::Duration;
//!
//! #[derive(serde::Deserialize)]
//! struct Profile {
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> cachelane::Result<()> {
//!     let executor = RequestExecutor::builder().build().await?;
//!
//!     let config = RequestConfig::<Json<Profile>>::get("https://example.com/profile")
//!         .auto_cache(true)
//!         .cache_for(Duration::from_secs(300));
//!
//!     let Json(profile) = executor.execute(config).await?;
//!     println!("hello {}", profile.name);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Two-tier response cache with expiry and stale reads |
//! | [`client`] | The request executor and its builder |
//! | [`decode`] | Decode chain and the [`Decodable`] trait |
//! | [`dispatch`] | Priority lanes and operations |
//! | [`request`] | Request configuration |
//! | [`telemetry`] | Process-wide log listener side-channel |
//! | [`transport`] | Transport trait and the reqwest-backed implementation |

pub mod cache;
pub mod client;
pub mod decode;
pub mod dispatch;
pub mod error_code;
pub mod request;
pub mod telemetry;
pub mod transport;

pub use cache::{CacheConfig, CacheEntry, CacheKey, CacheStore, ResponseMetadata};
pub use client::{RequestExecutor, RequestExecutorBuilder};
pub use decode::{Decodable, DecodeError, Json, ResponseDecoder};
pub use dispatch::{Lane, LaneConfig};
pub use request::{Expiry, RequestConfig};
pub use telemetry::{set_log_listener, LogEvent, LogLevel, LogListener};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorKind};
