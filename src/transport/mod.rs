//! Transport seam.
//!
//! The executor only needs "send this request, give me status, headers and
//! body". [`Transport`] captures that so the pipeline can run over
//! [`HttpTransport`] in production and over scripted transports in tests.

mod http;

pub use http::HttpTransport;

use crate::cache::ResponseMetadata;
use crate::error_code::TransportErrorCode;
use crate::request::PreparedRequest;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;

/// A fully received response.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn metadata(&self) -> ResponseMetadata {
        ResponseMetadata {
            status: self.status,
            url: self.url.clone(),
            headers: self
                .headers
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
                .collect(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{message}")]
    Other { code: TransportErrorCode, message: String },
}

impl TransportError {
    pub fn other(code: TransportErrorCode, message: impl Into<String>) -> Self {
        TransportError::Other { code, message: message.into() }
    }

    pub fn code(&self) -> TransportErrorCode {
        match self {
            TransportError::Http(e) => TransportErrorCode::from_reqwest(e),
            TransportError::Other { code, .. } => *code,
        }
    }
}

/// Sends one request and returns the complete response.
///
/// Implementations must not retry or time out on their own account; the
/// executor maps every `Err` to a network failure and tries stale fallback.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: PreparedRequest) -> Result<FetchedResponse, TransportError>;

    fn name(&self) -> &'static str {
        "custom"
    }
}
