//! Change results
//!
//! Written once per request to `completed/{id}.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::hash::ContentHash;
use crate::reason::ReasonCode;
use crate::request::RequestId;
use crate::tree::ConfigTree;

/// Terminal status of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultStatus {
    Completed,
    Failed,
}

/// Before/after record of one applied operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationOutcome {
    /// Position in the request
    pub index: usize,
    pub kind: String,
    pub file: String,
    /// Value or line before the operation (structured path value, or the line text)
    pub before: Option<ConfigTree>,
    pub after: Option<ConfigTree>,
}

/// Machine-readable reason plus human text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: ReasonCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<JsonValue>,
}

impl Diagnostic {
    #[must_use]
    pub fn new(code: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_detail(mut self, detail: JsonValue) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Reference to a stored backup taken during a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRef {
    /// File relative to the instance directory
    pub file: String,
    /// Key in the `backups` bucket
    pub key: String,
    pub checksum: ContentHash,
    pub size: u64,
}

/// Outcome of one change request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeResult {
    pub request_id: RequestId,
    pub status: ResultStatus,
    #[serde(default)]
    pub applied_operations: Vec<OperationOutcome>,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
    pub timestamp: DateTime<Utc>,
    /// Identity of the agent that wrote the result
    #[serde(default)]
    pub agent: String,
    /// The coordinator may re-enqueue the request
    #[serde(default)]
    pub retriable: bool,
    #[serde(default)]
    pub backups: Vec<BackupRef>,
}

impl ChangeResult {
    /// Completed result
    #[must_use]
    pub fn completed(request_id: RequestId, agent: impl Into<String>) -> Self {
        Self::with_status(request_id, ResultStatus::Completed, agent)
    }

    /// Failed result carrying diagnostics
    #[must_use]
    pub fn failed(
        request_id: RequestId,
        agent: impl Into<String>,
        diagnostics: Vec<Diagnostic>,
    ) -> Self {
        let mut result = Self::with_status(request_id, ResultStatus::Failed, agent);
        result.diagnostics = diagnostics;
        result
    }

    fn with_status(request_id: RequestId, status: ResultStatus, agent: impl Into<String>) -> Self {
        Self {
            request_id,
            status,
            applied_operations: Vec::new(),
            diagnostics: Vec::new(),
            timestamp: Utc::now(),
            agent: agent.into(),
            retriable: false,
            backups: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn retriable(mut self) -> Self {
        self.retriable = true;
        self
    }

    #[inline]
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == ResultStatus::Completed
    }

    /// First diagnostic code, if any
    #[must_use]
    pub fn primary_reason(&self) -> Option<ReasonCode> {
        self.diagnostics.first().map(|d| d.code)
    }
}
