//! Request configuration consumed by the executor.
//!
//! A [`RequestConfig`] is a plain, immutable description of one call. It is
//! validated into a [`PreparedRequest`] at the start of every execution;
//! anything that cannot be turned into a valid HTTP request surfaces as
//! [`Error::ConfigurationInvalid`].

use crate::{Error, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::Serialize;
use std::marker::PhantomData;
use std::time::Duration;
use url::Url;

/// When a cache entry written for a request stops being fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Fixed point in time.
    At(DateTime<Utc>),
    /// Relative to the moment the entry is written.
    After(Duration),
}

impl Expiry {
    pub fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Expiry::At(at) => *at,
            Expiry::After(ttl) => match chrono::Duration::from_std(*ttl) {
                Ok(d) => now.checked_add_signed(d).unwrap_or(DateTime::<Utc>::MAX_UTC),
                Err(_) => DateTime::<Utc>::MAX_UTC,
            },
        }
    }
}

/// Description of one request and how its result should be produced.
///
/// `T` is the decode target; it only exists at the type level.
#[derive(Debug)]
pub struct RequestConfig<T> {
    method: String,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
    body_error: Option<String>,
    is_main_priority: bool,
    auto_cache: bool,
    caching_time: Option<Expiry>,
    _target: PhantomData<fn() -> T>,
}

impl<T> Clone for RequestConfig<T> {
    fn clone(&self) -> Self {
        Self {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            body_error: self.body_error.clone(),
            is_main_priority: self.is_main_priority,
            auto_cache: self.auto_cache,
            caching_time: self.caching_time,
            _target: PhantomData,
        }
    }
}

impl<T> RequestConfig<T> {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
            body_error: None,
            is_main_priority: false,
            auto_cache: false,
            caching_time: None,
            _target: PhantomData,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `value` as the JSON body and sets `content-type`.
    ///
    /// A serialization failure is reported when the request is executed.
    pub fn json<S: Serialize + ?Sized>(mut self, value: &S) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => {
                self.body = Some(Bytes::from(body));
                self.body_error = None;
                self.header(CONTENT_TYPE.as_str(), "application/json")
            }
            Err(e) => {
                self.body_error = Some(e.to_string());
                self
            }
        }
    }

    /// Route the request through the serial primary lane.
    pub fn main_priority(mut self, yes: bool) -> Self {
        self.is_main_priority = yes;
        self
    }

    /// Write successful responses through to the cache.
    pub fn auto_cache(mut self, yes: bool) -> Self {
        self.auto_cache = yes;
        self
    }

    pub fn caching_time(mut self, expiry: Expiry) -> Self {
        self.caching_time = Some(expiry);
        self
    }

    pub fn cache_for(self, ttl: Duration) -> Self {
        self.caching_time(Expiry::After(ttl))
    }

    pub fn cache_until(self, at: DateTime<Utc>) -> Self {
        self.caching_time(Expiry::At(at))
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn is_main_priority(&self) -> bool {
        self.is_main_priority
    }

    pub fn is_auto_cache(&self) -> bool {
        self.auto_cache
    }

    pub fn expiry(&self) -> Option<Expiry> {
        self.caching_time
    }

    /// Validates the configuration into a transport-ready request.
    pub fn prepare(&self) -> Result<PreparedRequest> {
        if let Some(ref e) = self.body_error {
            return Err(Error::configuration(
                format!("body serialization failed: {}", e),
                "body",
            ));
        }

        let method = Method::from_bytes(self.method.trim().to_uppercase().as_bytes())
            .map_err(|_| Error::configuration(format!("invalid method {:?}", self.method), "method"))?;

        let url = Url::parse(self.url.trim())
            .map_err(|e| Error::configuration(format!("{}: {:?}", e, self.url), "url"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::configuration(
                format!("unsupported scheme {:?}", url.scheme()),
                "url",
            ));
        }

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::configuration(format!("invalid header name {:?}", name), "headers"))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| Error::configuration(format!("invalid value for header {}", name), "headers"))?;
            headers.append(name, value);
        }

        Ok(PreparedRequest {
            method,
            url,
            headers,
            body: self.body.clone(),
        })
    }
}

/// A validated request, ready to hand to a [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}
