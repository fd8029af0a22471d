//! Store errors

use confsync_model::ReasonCode;
use thiserror::Error;

/// Object store access failed
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object does not exist
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Backend refused or could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Call exceeded its time bound
    #[error("store {op} timed out after {after_ms}ms")]
    Timeout { op: &'static str, after_ms: u64 },

    /// Filesystem backend I/O failure
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Object bytes did not (de)serialize
    #[error("serialization error for {key}: {message}")]
    Serialization { key: String, message: String },

    /// Key would escape its bucket or is empty
    #[error("invalid key '{0}'")]
    InvalidKey(String),
}

impl StoreError {
    /// Create not-found error
    #[must_use]
    pub fn not_found(bucket: &str, key: &str) -> Self {
        Self::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    /// Whether another attempt may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout { .. } | Self::Io(_))
    }

    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Reason code reported in results
    #[must_use]
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            Self::NotFound { .. } => ReasonCode::NotFound,
            Self::Serialization { .. } | Self::InvalidKey(_) => ReasonCode::MalformedRequest,
            Self::Unavailable(_) | Self::Timeout { .. } | Self::Io(_) => {
                ReasonCode::StoreUnavailable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_not_retryable() {
        let err = StoreError::not_found("changes", "completed/x.json");
        assert!(!err.is_retryable());
        assert!(err.is_not_found());
        assert_eq!(err.reason_code(), ReasonCode::NotFound);
    }

    #[test]
    fn transient_errors_retry() {
        assert!(StoreError::Unavailable("503".into()).is_retryable());
        assert!(StoreError::Timeout { op: "get", after_ms: 10 }.is_retryable());
        assert_eq!(
            StoreError::Unavailable("503".into()).reason_code(),
            ReasonCode::StoreUnavailable
        );
    }
}
