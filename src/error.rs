//! The error taxonomy used at the boundaries of the market engine.
//!
//! Internal plumbing mostly passes `anyhow::Error` around, the way the
//! teacher's own `Result` alias does, because most internal failures end
//! up persisted as part of a [`crate::model::ProviderAnswer`] rather than
//! propagated. [`MarketError`] exists for the handful of places spec.md
//! §7 says errors are allowed to cross the library boundary: config
//! problems at startup, and `all_providers_failed`/persistence failures
//! out of [`crate::coordinator`].

use thiserror::Error;

/// Errors that can escape the market engine.
#[derive(Debug, Error)]
pub enum MarketError {
    /// A provider or market configuration value was missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// No enabled provider produced a usable answer in some round.
    #[error("unable to get responses from any provider")]
    AllProvidersFailed,

    /// Writing a run, answer, or arbiter output to the store failed.
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),
}

/// The fine-grained error kind attached to a single provider call.
///
/// This is the taxonomy from spec.md §7 that never crosses the coordinator
/// boundary on its own — it is always wrapped in a
/// [`crate::model::ProviderError`] and persisted alongside the
/// [`crate::model::ProviderAnswer`] it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The remote rejected our credentials outright (HTTP 401).
    AuthError,
    /// The remote understood our credentials but refused the request
    /// (HTTP 403).
    Forbidden,
    /// Our local token bucket had no tokens available.
    RateLimited,
    /// The remote told us to slow down (HTTP 429).
    RateLimit,
    /// The remote had an internal failure (HTTP 5xx).
    ServerError,
    /// Our client-side deadline elapsed before the remote responded.
    Timeout,
    /// A transport-level failure other than a timeout.
    NetworkError,
    /// The response body could not be parsed as JSON, or didn't match
    /// the expected shape even after recovery heuristics were applied.
    ParseError,
    /// The provider's safety/content filter fired.
    SafetyBlock,
    /// The per-provider circuit breaker was open.
    CircuitOpen,
    /// The provider client actor was never started (no credentials, or
    /// disabled in configuration).
    ProviderNotStarted,
}

impl ErrorKind {
    /// Is this class of failure worth retrying, per spec.md §4.4 step 5?
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit | ErrorKind::ServerError | ErrorKind::Timeout
        )
    }
}

use serde::{Deserialize, Serialize};

/// A structured error describing why a single provider call failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderError {
    /// The coarse-grained kind of failure.
    pub kind: ErrorKind,
    /// A human-readable message, safe to log and persist.
    pub message: String,
    /// The HTTP status code, if the failure happened at the HTTP layer.
    pub http_status: Option<u16>,
}

impl ProviderError {
    /// Build a new [`ProviderError`].
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            http_status: None,
        }
    }

    /// Attach an HTTP status code.
    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    /// Is this error worth retrying per spec.md §4.4 step 5?
    pub fn is_retryable(&self) -> bool {
        match self.http_status {
            Some(status) => matches!(status, 429 | 500 | 502 | 503 | 504),
            None => self.kind.is_retryable(),
        }
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ProviderError {}
