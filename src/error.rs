use crate::decode::DecodeError;
use thiserror::Error;

/// Coarse classification of an [`Error`], handy for matching and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConfigurationInvalid,
    NetworkFailure,
    EmptyPayload,
    DecodeFailure,
    MalformedJson,
    Cache,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConfigurationInvalid => "configuration_invalid",
            Self::NetworkFailure => "network_failure",
            Self::EmptyPayload => "empty_payload",
            Self::DecodeFailure => "decode_failure",
            Self::MalformedJson => "malformed_json",
            Self::Cache => "cache",
        }
    }
}

/// Unified error type for the execution pipeline.
///
/// Every variant is a recoverable, caller-visible failure; nothing here is
/// fatal to the process.
#[derive(Debug, Error)]
pub enum Error {
    /// The request could not be built from its configuration.
    #[error("Invalid request configuration: {message}{}", format_field(.field))]
    ConfigurationInvalid {
        message: String,
        field: Option<&'static str>,
    },

    /// Transport-level failure with no stale cache entry to fall back on.
    #[error("Network failure ({code}): {message}")]
    NetworkFailure { code: i32, message: String },

    /// A terminal success response carried no body.
    #[error("Response carried no payload")]
    EmptyPayload,

    /// Neither decode stage could build the target type.
    #[error("Decode failure: {0}")]
    DecodeFailure(#[from] DecodeError),

    /// Cache I/O failure. Only returned by direct cache calls; the executor
    /// treats these as misses.
    #[error("Cache error: {0}")]
    Cache(#[from] crate::cache::CacheError),
}

fn format_field(field: &Option<&'static str>) -> String {
    match field {
        Some(f) => format!(" (field: {})", f),
        None => String::new(),
    }
}

impl Error {
    pub fn configuration(msg: impl Into<String>, field: &'static str) -> Self {
        Error::ConfigurationInvalid {
            message: msg.into(),
            field: Some(field),
        }
    }

    pub fn network(code: i32, msg: impl Into<String>) -> Self {
        Error::NetworkFailure {
            code,
            message: msg.into(),
        }
    }

    /// Classification. A decode failure caused by unparseable JSON reports
    /// [`ErrorKind::MalformedJson`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConfigurationInvalid { .. } => ErrorKind::ConfigurationInvalid,
            Error::NetworkFailure { .. } => ErrorKind::NetworkFailure,
            Error::EmptyPayload => ErrorKind::EmptyPayload,
            Error::DecodeFailure(DecodeError::MalformedJson(_)) => ErrorKind::MalformedJson,
            Error::DecodeFailure(_) => ErrorKind::DecodeFailure,
            Error::Cache(_) => ErrorKind::Cache,
        }
    }

    /// Whether this is a decode failure of either flavour.
    pub fn is_decode_failure(&self) -> bool {
        matches!(self, Error::DecodeFailure(_))
    }

    /// Numeric code for log listeners. Network failures carry the transport
    /// code; the remaining kinds use fixed negative codes.
    pub fn code(&self) -> i32 {
        match self {
            Error::NetworkFailure { code, .. } => *code,
            Error::ConfigurationInvalid { .. } => -2000,
            Error::EmptyPayload => -2001,
            Error::DecodeFailure(DecodeError::MalformedJson(_)) => -2003,
            Error::DecodeFailure(_) => -2002,
            Error::Cache(_) => -2004,
        }
    }
}
