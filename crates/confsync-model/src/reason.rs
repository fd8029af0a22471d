//! Machine-readable reason codes carried by diagnostics and drift items

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Reason code attached to every failure a result reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    ValidationFailed,
    ConcurrencyConflict,
    NoMatch,
    AmbiguousMatch,
    NotFound,
    ParseFailed,
    ApplyFailed,
    BackupFailed,
    StoreUnavailable,
    DeadlineExceeded,
    MalformedRequest,
    PanelRestartFailed,
}

impl ReasonCode {
    /// Wire form, e.g. `NO_MATCH`
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
            Self::NoMatch => "NO_MATCH",
            Self::AmbiguousMatch => "AMBIGUOUS_MATCH",
            Self::NotFound => "NOT_FOUND",
            Self::ParseFailed => "PARSE_FAILED",
            Self::ApplyFailed => "APPLY_FAILED",
            Self::BackupFailed => "BACKUP_FAILED",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::MalformedRequest => "MALFORMED_REQUEST",
            Self::PanelRestartFailed => "PANEL_RESTART_FAILED",
        }
    }
}

impl Display for ReasonCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_form_matches_display() {
        for code in [
            ReasonCode::ConcurrencyConflict,
            ReasonCode::NoMatch,
            ReasonCode::PanelRestartFailed,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{code}\""));
        }
    }
}
