//! Model-level errors

use thiserror::Error;

use crate::format::FileFormat;
use crate::reason::ReasonCode;

/// File text could not be converted to or from a config tree
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Text is not valid for its format
    #[error("{format} syntax error: {message}")]
    Syntax { format: FileFormat, message: String },

    /// Tree holds something the format cannot express
    #[error("{format} cannot represent {what}")]
    Unrepresentable { format: FileFormat, what: String },

    /// Format has no structured representation
    #[error("{0} files have no structured representation")]
    Unstructured(FileFormat),
}

impl ParseError {
    /// Reason code reported in results
    #[inline]
    #[must_use]
    pub fn reason_code(&self) -> ReasonCode {
        ReasonCode::ParseFailed
    }
}

/// Tree navigation failed while setting a value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// An intermediate value is not a map or list
    #[error("value at '{at}' is a {kind}, not a container")]
    NotAContainer { at: String, kind: &'static str },

    /// The root itself cannot be replaced by a keyed set
    #[error("empty key path")]
    EmptyPath,

    /// List segment is not a valid index
    #[error("'{segment}' is not a valid index at '{at}' (list length {len})")]
    BadIndex {
        at: String,
        segment: String,
        len: usize,
    },
}

/// A change request is malformed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// Request id contains characters unsafe for store keys
    #[error("invalid request id '{0}'")]
    InvalidId(String),

    /// A required field is empty
    #[error("field '{0}' must not be empty")]
    EmptyField(&'static str),

    /// Request has no operations
    #[error("request has no operations")]
    NoOperations,

    /// Operation is internally inconsistent
    #[error("operation {index}: {reason}")]
    BadOperation { index: usize, reason: String },
}
