//! Agent error types

use std::path::PathBuf;

use confsync_drift::DriftError;
use confsync_store::StoreError;
use thiserror::Error;

/// Configuration could not be loaded
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file unreadable
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for [`crate::AgentConfig`]
    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// A cycle of the agent failed as a whole
///
/// Failures that concern a single request end up in that request's Result
/// instead.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Object store unavailable (after retries)
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Baseline could not be loaded
    #[error(transparent)]
    Drift(#[from] DriftError),

    /// Local filesystem failure
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Result journal entry unreadable or unwritable
    #[error("result journal error for {id}: {message}")]
    Journal { id: String, message: String },
}

impl AgentError {
    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the next tick may succeed without intervention
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::Io { .. } | Self::Journal { .. } => true,
            Self::Config(_) | Self::Drift(_) => false,
        }
    }
}
