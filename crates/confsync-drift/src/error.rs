//! Drift errors

use std::path::PathBuf;

/// Drift detection errors
#[derive(Debug, thiserror::Error)]
pub enum DriftError {
    /// Baseline directory could not be read
    #[error("cannot read baseline at {path}: {source}")]
    Baseline {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Scoring configuration is out of range
    #[error("invalid drift config: {0}")]
    InvalidConfig(String),
}
