//! Error taxonomy for the cache tiers.
//!
//! Provider errors (redis, deadpool) are classified into these variants in
//! one place so callers can branch on meaning rather than on provider types.

use std::fmt;

use libris_storage::StorageError;

/// Errors produced by the cache layer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The key is absent from the remote tier. Drives fallback, not an error
    /// in the operational sense.
    #[error("Cache miss: {key}")]
    NotFound {
        /// The key that was looked up.
        key: String,
    },

    /// The call did not complete before its deadline.
    #[error("Timeout during {operation} on {key}")]
    Timeout {
        /// Operation name, e.g. "get".
        operation: &'static str,
        /// The key (or key summary) involved.
        key: String,
    },

    /// The remote tier could not be reached.
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        /// Description of the transport failure.
        message: String,
    },

    /// Malformed key set or configuration.
    #[error("Validation error: {message}")]
    Validation {
        /// What was rejected and why.
        message: String,
    },

    /// Payload could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the codec failure.
        message: String,
    },

    /// The client has been closed; no I/O was attempted.
    #[error("Cache client is closed")]
    Closed,

    /// Any other provider error, with operation and key context.
    #[error("Remote error during {operation} on {key}: {message}")]
    Remote {
        operation: &'static str,
        key: String,
        message: String,
    },

    /// The source-of-truth store failed while recomputing a value.
    #[error(transparent)]
    Store(#[from] StorageError),
}

impl CacheError {
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    #[must_use]
    pub fn timeout(operation: &'static str, key: impl Into<String>) -> Self {
        Self::Timeout {
            operation,
            key: key.into(),
        }
    }

    #[must_use]
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn remote(
        operation: &'static str,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Remote {
            operation,
            key: key.into(),
            message: message.into(),
        }
    }

    /// Returns `true` for an absent key.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` for a deadline expiry.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` when the remote tier is unreachable or too slow, i.e.
    /// the failure says nothing about the data itself.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ConnectionFailed { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::ExpectedMiss,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::ConnectionFailed { .. } | Self::Closed => ErrorCategory::Connection,
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Serialization { .. } => ErrorCategory::Serialization,
            Self::Remote { .. } => ErrorCategory::Remote,
            Self::Store(_) => ErrorCategory::Store,
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

/// Categories of cache errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    ExpectedMiss,
    Timeout,
    Connection,
    Validation,
    Serialization,
    Remote,
    Store,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExpectedMiss => "expected_miss",
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::Validation => "validation",
            Self::Serialization => "serialization",
            Self::Remote => "remote",
            Self::Store => "store",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type alias for a cache result.
pub type CacheResult<T> = Result<T, CacheError>;
