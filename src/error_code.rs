//! Transport failure codes.
//!
//! Network failures are surfaced with a numeric code and a stable name so that
//! callers and log listeners can classify them without parsing messages.
//!
//! ## Code Ranges
//!
//! | Range       | Category    | Description                          |
//! |-------------|-------------|--------------------------------------|
//! | 100..=599   | http        | Non-success HTTP status (code = status) |
//! | -1001..-1099| transport   | Connection-level failures            |
//! | -1       | unknown     | Unclassified                         |
//!
//! ## Example
//!
//! ```rust
//! use cachelane::error_code::TransportErrorCode;
//!
//! let code = TransportErrorCode::from_http_status(503);
//! assert_eq!(code.code(), 503);
//! assert_eq!(code.name(), "http_status");
//! assert!(code.is_http());
//! ```

use std::fmt;

/// Classified transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorCode {
    /// The server answered with a non-success status
    HttpStatus(u16),
    /// The transport gave up waiting (its own default timeout)
    TimedOut,
    /// Could not establish a connection (DNS, refused, TLS handshake)
    CannotConnect,
    /// The connection dropped mid-exchange (reset, closed early)
    ConnectionLost,
    /// Too many redirects or an invalid redirect target
    Redirect,
    /// The response body could not be read
    Body,
    /// The request could not be encoded by the transport
    Request,
    /// Anything else
    Unknown,
}

impl TransportErrorCode {
    /// Numeric code. HTTP statuses keep their value; transport-level failures
    /// use negative codes.
    #[inline]
    pub fn code(&self) -> i32 {
        match self {
            Self::HttpStatus(status) => i32::from(*status),
            Self::TimedOut => -1001,
            Self::CannotConnect => -1004,
            Self::ConnectionLost => -1005,
            Self::Redirect => -1007,
            Self::Body => -1017,
            Self::Request => -1000,
            Self::Unknown => -1,
        }
    }

    /// Stable name (e.g. `"timed_out"`).
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::HttpStatus(_) => "http_status",
            Self::TimedOut => "timed_out",
            Self::CannotConnect => "cannot_connect",
            Self::ConnectionLost => "connection_lost",
            Self::Redirect => "redirect",
            Self::Body => "body",
            Self::Request => "request",
            Self::Unknown => "unknown",
        }
    }

    #[inline]
    pub fn is_http(&self) -> bool {
        matches!(self, Self::HttpStatus(_))
    }

    pub fn from_http_status(status: u16) -> Self {
        Self::HttpStatus(status)
    }

    /// Classifies a reqwest error.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::HttpStatus(status.as_u16());
        }
        if err.is_timeout() {
            Self::TimedOut
        } else if err.is_connect() {
            Self::CannotConnect
        } else if err.is_redirect() {
            Self::Redirect
        } else if err.is_body() || err.is_decode() {
            Self::Body
        } else if err.is_request() {
            // Hyper surfaces resets and early closes as request errors.
            Self::ConnectionLost
        } else if err.is_builder() {
            Self::Request
        } else {
            Self::Unknown
        }
    }
}

impl fmt::Display for TransportErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}
