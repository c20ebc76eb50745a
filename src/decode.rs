//! Decode chain (Bytes -> T).
//!
//! Response bytes are turned into the caller's type in two ordered stages:
//!
//! 1. direct construction from raw bytes ([`Decodable::from_bytes`]), which
//!    covers binary and other non-JSON wire formats;
//! 2. JSON parsing followed by [`Decodable::from_json`].
//!
//! The JSON stage only runs when the first stage declines. Bytes that fail
//! to parse as JSON at that point are a terminal [`DecodeError::MalformedJson`].

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

/// A type the executor can produce from a response payload.
///
/// Both constructors default to declining, so implementors only provide the
/// stage that matches their wire format.
pub trait Decodable: Sized + Send + 'static {
    /// Direct construction from raw bytes.
    fn from_bytes(_bytes: &Bytes) -> Option<Self> {
        None
    }

    /// Construction from an already parsed JSON value.
    fn from_json(_value: Value) -> Option<Self> {
        None
    }

    /// Expiry hint used when the request asked for automatic caching.
    fn caching_ends_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    MalformedJson(#[source] serde_json::Error),

    #[error("payload could not be represented as {type_name}")]
    Unrepresentable { type_name: &'static str },
}

/// Runs the two-stage decode chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseDecoder;

impl ResponseDecoder {
    pub fn new() -> Self {
        Self
    }

    pub fn decode<T: Decodable>(&self, raw: &Bytes) -> Result<T, DecodeError> {
        if let Some(value) = T::from_bytes(raw) {
            return Ok(value);
        }

        let json: Value = serde_json::from_slice(raw).map_err(DecodeError::MalformedJson)?;
        match T::from_json(json) {
            Some(value) => Ok(value),
            None => {
                let type_name = std::any::type_name::<T>();
                debug!(type_name, bytes = raw.len(), "both decode stages declined");
                Err(DecodeError::Unrepresentable { type_name })
            }
        }
    }
}

/// Adapter that decodes any `DeserializeOwned` type through the JSON stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: DeserializeOwned + Send + 'static> Decodable for Json<T> {
    fn from_json(value: Value) -> Option<Self> {
        serde_json::from_value(value).ok().map(Json)
    }
}

impl Decodable for Bytes {
    fn from_bytes(bytes: &Bytes) -> Option<Self> {
        Some(bytes.clone())
    }
}

impl Decodable for Vec<u8> {
    fn from_bytes(bytes: &Bytes) -> Option<Self> {
        Some(bytes.to_vec())
    }
}

impl Decodable for String {
    fn from_bytes(bytes: &Bytes) -> Option<Self> {
        std::str::from_utf8(bytes).ok().map(str::to_owned)
    }
}

impl Decodable for Value {
    fn from_json(value: Value) -> Option<Self> {
        Some(value)
    }
}
