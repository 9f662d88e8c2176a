// shared/src/lib.rs

use std::sync::Arc;
use std::time::Duration;

/// Error raised by a caller-supplied computation, shared between every caller
/// that joined the same in-flight computation.
pub type ComputeError = Arc<dyn std::error::Error + Send + Sync>;

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("invalid destination: cannot write a `{found}` into a `{expected}`")]
    InvalidDestination {
        expected: &'static str,
        found: &'static str,
    },
    #[error("compute failed: {0}")]
    ComputeFailed(ComputeError),
    #[error("encode failed: {0}")]
    EncodeFailed(String),
    #[error("decode failed: {0}")]
    DecodeFailed(String),
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("invalid uri: {0}")]
    InvalidUri(String),
    #[error("invalid uri scheme: {0}")]
    InvalidScheme(String),
    #[error("config: {0}")]
    Config(String),
}

impl Error {
    /// The caller's own error, when this is a `ComputeFailed`.
    pub fn compute_source(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Error::ComputeFailed(source) => Some(source.as_ref()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Expiry in whole seconds, as remote stores take it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TtlSecs(pub u64);

impl TtlSecs {
    /// Truncates to whole seconds, never below one: a zero expiry is rejected
    /// by the store.
    pub fn from_duration(ttl: Duration) -> Self {
        Self(ttl.as_secs().max(1))
    }
}

pub mod config;
