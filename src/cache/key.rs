//! Cache key generation.

use crate::request::PreparedRequest;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Identity of a cached response.
///
/// The hash is a hex SHA-256 over the canonical request identity; it doubles as
/// the on-disk file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub hash: String,
}

impl CacheKey {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }
    pub fn as_str(&self) -> &str {
        &self.hash
    }
    /// Short prefix for log fields.
    pub fn short(&self) -> &str {
        match self.hash.char_indices().nth(12) {
            Some((end, _)) => &self.hash[..end],
            None => &self.hash,
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.hash) }
}

impl From<&str> for CacheKey { fn from(s: &str) -> Self { Self::new(s) } }
impl From<String> for CacheKey { fn from(s: String) -> Self { Self::new(s) } }

/// Headers that take part in the key unless configured otherwise.
pub const DEFAULT_KEY_HEADERS: &[&str] = &["accept", "accept-language", "authorization"];

/// Derives keys from method, URL and a fixed subset of headers.
///
/// Headers outside the subset (tracing ids, user agents) never split the cache.
#[derive(Debug, Clone)]
pub struct CacheKeyGenerator {
    headers: Vec<String>,
}

impl CacheKeyGenerator {
    pub fn new() -> Self {
        Self::with_headers(DEFAULT_KEY_HEADERS.iter().copied())
    }

    pub fn with_headers<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut headers: Vec<String> = headers.into_iter().map(|h| h.as_ref().to_ascii_lowercase()).collect();
        headers.sort();
        headers.dedup();
        Self { headers }
    }

    pub fn generate(&self, request: &PreparedRequest) -> CacheKey {
        let mut parts: BTreeMap<String, String> = BTreeMap::new();
        parts.insert("method".into(), request.method.as_str().to_string());
        parts.insert("url".into(), request.url.as_str().to_string());
        for name in &self.headers {
            let values: Vec<&str> = request.headers.get_all(name.as_str()).iter().filter_map(|v| v.to_str().ok()).collect();
            if !values.is_empty() {
                parts.insert(format!("header:{}", name), values.join(","));
            }
        }
        let canonical = serde_json::to_string(&parts).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let hash: String = hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect();
        CacheKey::new(hash)
    }
}

impl Default for CacheKeyGenerator { fn default() -> Self { Self::new() } }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RequestConfig;

    fn key_for(cfg: RequestConfig<String>) -> CacheKey {
        CacheKeyGenerator::new().generate(&cfg.prepare().unwrap())
    }

    #[test]
    fn identical_requests_share_a_key() {
        let a = key_for(RequestConfig::get("https://example.com/a").header("Accept", "text/plain"));
        let b = key_for(RequestConfig::get("https://example.com/a").header("accept", "text/plain"));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn method_url_and_subset_headers_split_keys() {
        let base = key_for(RequestConfig::get("https://example.com/a"));
        assert_ne!(base, key_for(RequestConfig::post("https://example.com/a")));
        assert_ne!(base, key_for(RequestConfig::get("https://example.com/b")));
        assert_ne!(base, key_for(RequestConfig::get("https://example.com/a").header("Authorization", "Bearer x")));
    }

    #[test]
    fn short_form_respects_char_boundaries() {
        let hashed = key_for(RequestConfig::get("https://example.com/a"));
        assert_eq!(hashed.short().len(), 12);
        assert_eq!(CacheKey::from("ключ-кэша-для-профиля").short(), "ключ-кэша-дл");
        assert_eq!(CacheKey::from("tiny").short(), "tiny");
    }

    #[test]
    fn headers_outside_subset_are_ignored() {
        let base = key_for(RequestConfig::get("https://example.com/a"));
        let traced = key_for(RequestConfig::get("https://example.com/a").header("X-Request-Id", "42"));
        assert_eq!(base, traced);
    }
}
