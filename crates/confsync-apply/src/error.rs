//! Error types for validation and application
//!
//! - [`ValidationError`]: preconditions failed, nothing was touched
//! - [`ApplyError`]: an operation failed mid-sequence, touched files are
//!   rolled back
//! - [`BackupError`]: a backup could not be stored or fetched

use std::path::PathBuf;

use confsync_model::{ConfigTree, Diagnostic, FileFormat, ParseError, ReasonCode, TreeError};
use serde_json::json;

/// A single failed precondition
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Violation {
    /// Instance directory does not exist
    #[error("instance '{instance}' not found")]
    InstanceNotFound { instance: String },

    /// Target file does not exist
    #[error("file '{file}' not found")]
    FileNotFound { file: String },

    /// File path is absolute or climbs out of the instance directory
    #[error("file '{file}' escapes the instance directory")]
    PathEscape { file: String },

    /// Value on disk differs from `expected_prior_value`
    #[error("concurrency conflict in '{file}' at '{path}': expected {expected}, found {}", .observed.as_ref().map_or_else(|| "nothing".to_string(), ConfigTree::render))]
    ConcurrencyConflict {
        index: usize,
        file: String,
        path: String,
        expected: ConfigTree,
        observed: Option<ConfigTree>,
    },

    /// Current file cannot be read as its format
    #[error("file '{file}' does not parse: {message}")]
    Unparsable { file: String, message: String },

    /// Not enough free space for backups plus the configured floor
    #[error("insufficient disk space: need {required} bytes, {available} available")]
    InsufficientDisk { required: u64, available: u64 },

    /// Another in-flight operation holds the file
    #[error("file '{file}' is locked by {holder}")]
    FileLocked { file: String, holder: String },

    /// Operation is internally inconsistent
    #[error("operation {index}: {reason}")]
    MalformedOperation { index: usize, reason: String },
}

impl Violation {
    /// Reason code reported in results
    #[must_use]
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            Self::ConcurrencyConflict { .. } => ReasonCode::ConcurrencyConflict,
            Self::InstanceNotFound { .. } | Self::FileNotFound { .. } => ReasonCode::NotFound,
            Self::Unparsable { .. } => ReasonCode::ParseFailed,
            Self::MalformedOperation { .. } | Self::PathEscape { .. } => {
                ReasonCode::MalformedRequest
            }
            Self::InsufficientDisk { .. } | Self::FileLocked { .. } => ReasonCode::ValidationFailed,
        }
    }

    /// Diagnostic with a machine-readable detail payload
    #[must_use]
    pub fn to_diagnostic(&self) -> Diagnostic {
        let diagnostic = Diagnostic::new(self.reason_code(), self.to_string());
        match self {
            Self::ConcurrencyConflict {
                index,
                file,
                path,
                expected,
                observed,
            } => diagnostic.with_detail(json!({
                "operation": index,
                "file": file,
                "path": path,
                "expected": expected,
                "observed": observed,
            })),
            Self::InsufficientDisk {
                required,
                available,
            } => diagnostic.with_detail(json!({
                "required": required,
                "available": available,
            })),
            _ => diagnostic,
        }
    }
}

/// Preconditions failed; zero mutation happened
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("validation failed with {} violation(s): {}", .violations.len(), summarize(.violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl ValidationError {
    /// Concurrency conflicts win; anything else is a generic validation failure
    #[must_use]
    pub fn reason_code(&self) -> ReasonCode {
        if self
            .violations
            .iter()
            .any(|v| matches!(v, Violation::ConcurrencyConflict { .. }))
        {
            ReasonCode::ConcurrencyConflict
        } else {
            ReasonCode::ValidationFailed
        }
    }

    #[must_use]
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.violations.iter().map(Violation::to_diagnostic).collect()
    }
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Backup persistence failed
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Sink could not store the snapshot
    #[error("backup write failed for {file}: {message}")]
    Write { file: String, message: String },

    /// Backup to restore does not exist
    #[error("backup '{0}' not found")]
    Missing(String),

    /// Sink I/O failure
    #[error("backup I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An operation failed while applying a request
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    /// Pattern matched no line
    #[error("no line in '{file}' matches '{pattern}'")]
    NoMatch { file: String, pattern: String },

    /// Pattern matched more than one line where exactly one is required
    #[error("{count} lines in '{file}' match '{pattern}', expected exactly one")]
    AmbiguousMatch {
        file: String,
        pattern: String,
        count: usize,
    },

    /// Target file does not exist
    #[error("file '{file}' not found")]
    NotFound { file: String },

    /// File did not parse before or after the edit
    #[error("'{file}' failed to parse: {source}")]
    Parse {
        file: String,
        #[source]
        source: ParseError,
    },

    /// Operation needs a structured format
    #[error("'{file}' is {format}, which has no keys to set")]
    UnsupportedFormat { file: String, format: FileFormat },

    /// Pattern is not a valid regular expression
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// Key path cannot be set in this tree
    #[error("cannot set key in '{file}': {source}")]
    Tree {
        file: String,
        #[source]
        source: TreeError,
    },

    /// File path escapes the instance directory
    #[error("file '{file}' escapes the instance directory")]
    PathEscape { file: String },

    /// Another in-flight request holds the file
    #[error("file '{file}' is locked by {holder}")]
    Locked { file: String, holder: String },

    /// Key path is not valid for the file's format
    #[error("invalid key path '{path}': {message}")]
    InvalidKey { path: String, message: String },

    /// Backup could not be taken or restored
    #[error(transparent)]
    Backup(#[from] BackupError),

    /// Filesystem failure
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ApplyError {
    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Reason code reported in results
    #[must_use]
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            Self::NoMatch { .. } => ReasonCode::NoMatch,
            Self::AmbiguousMatch { .. } => ReasonCode::AmbiguousMatch,
            Self::NotFound { .. } => ReasonCode::NotFound,
            Self::Parse { .. } => ReasonCode::ParseFailed,
            Self::Backup(_) => ReasonCode::BackupFailed,
            Self::InvalidPattern { .. } | Self::PathEscape { .. } | Self::InvalidKey { .. } => {
                ReasonCode::MalformedRequest
            }
            Self::Locked { .. } => ReasonCode::ValidationFailed,
            Self::UnsupportedFormat { .. } | Self::Tree { .. } | Self::Io { .. } => {
                ReasonCode::ApplyFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_wins_reason_code() {
        let err = ValidationError {
            violations: vec![
                Violation::FileLocked {
                    file: "a.yml".into(),
                    holder: "r0".into(),
                },
                Violation::ConcurrencyConflict {
                    index: 0,
                    file: "a.yml".into(),
                    path: "x".into(),
                    expected: ConfigTree::int(2),
                    observed: Some(ConfigTree::int(5)),
                },
            ],
        };
        assert_eq!(err.reason_code(), ReasonCode::ConcurrencyConflict);
        let diags = err.diagnostics();
        assert_eq!(diags.len(), 2);
        let detail = diags[1].detail.as_ref().unwrap();
        assert_eq!(detail["expected"], 2);
        assert_eq!(detail["observed"], 5);
        assert!(err.to_string().contains("expected 2, found 5"));
    }

    #[test]
    fn apply_reason_codes() {
        let err = ApplyError::AmbiguousMatch {
            file: "motd.txt".into(),
            pattern: "x".into(),
            count: 3,
        };
        assert_eq!(err.reason_code(), ReasonCode::AmbiguousMatch);
        assert_eq!(
            ApplyError::NotFound { file: "b.yml".into() }.reason_code(),
            ReasonCode::NotFound
        );
    }
}
