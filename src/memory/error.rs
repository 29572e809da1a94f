//! Memory store error types.
//!
//! Distinguishes between transient failures (memory degrades to no-context operation)
//! and credential failures (fatal at startup).

use std::time::Duration;

use thiserror::Error;

/// Error from memory store calls.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Network or service failure. The session carries on without memory.
    #[error("Memory service unavailable: {0}")]
    Unavailable(String),

    /// The API key was rejected.
    #[error("Memory service rejected credentials: {0}")]
    Unauthorized(String),

    /// The call did not finish in time. Handled like `Unavailable`.
    #[error("Memory service timed out after {0:?}")]
    Timeout(Duration),
}

impl MemoryError {
    /// Build an error from a non-success HTTP response.
    pub fn from_status(status: u16, body: &str) -> Self {
        match classify_http_status(status) {
            MemoryErrorKind::Unauthorized => {
                Self::Unauthorized(format!("HTTP {}: {}", status, body))
            }
            _ => Self::Unavailable(format!("HTTP {}: {}", status, body)),
        }
    }

    /// Check if this error is transient and memory should simply degrade.
    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }

    pub fn kind(&self) -> MemoryErrorKind {
        match self {
            Self::Unavailable(_) => MemoryErrorKind::Unavailable,
            Self::Unauthorized(_) => MemoryErrorKind::Unauthorized,
            Self::Timeout(_) => MemoryErrorKind::Timeout,
        }
    }

    /// Map a transport error from a request that was sent with `deadline`.
    pub fn from_transport(err: reqwest::Error, deadline: Duration) -> Self {
        if err.is_timeout() {
            return Self::Timeout(deadline);
        }
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), &err.to_string());
        }
        Self::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Unavailable(format!("Malformed response: {}", err))
    }
}

/// Classification of memory errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryErrorKind {
    Unavailable,
    Unauthorized,
    Timeout,
}

impl MemoryErrorKind {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable | Self::Timeout)
    }
}

/// Parse HTTP status code into error kind.
pub fn classify_http_status(status: u16) -> MemoryErrorKind {
    match status {
        401 | 403 => MemoryErrorKind::Unauthorized,
        _ => MemoryErrorKind::Unavailable,
    }
}
