//! Deployment stages and the pure transition function

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Deployment stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Created,
    DevPending,
    DevInProgress,
    DevComplete,
    DevFailed,
    ProdApproved,
    ProdInProgress,
    ProdComplete,
    ProdFailed,
    RolledBack,
}

impl Stage {
    pub const ALL: [Stage; 10] = [
        Stage::Created,
        Stage::DevPending,
        Stage::DevInProgress,
        Stage::DevComplete,
        Stage::DevFailed,
        Stage::ProdApproved,
        Stage::ProdInProgress,
        Stage::ProdComplete,
        Stage::ProdFailed,
        Stage::RolledBack,
    ];

    /// Stages in which change requests are outstanding
    #[inline]
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::DevPending | Self::DevInProgress | Self::ProdApproved | Self::ProdInProgress
        )
    }

    /// Whether the active requests target prod
    #[inline]
    #[must_use]
    pub fn is_prod(self) -> bool {
        matches!(
            self,
            Self::ProdApproved | Self::ProdInProgress | Self::ProdComplete | Self::ProdFailed
        )
    }

    /// No forward progress possible (rollback may still apply)
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::DevFailed | Self::ProdComplete | Self::ProdFailed | Self::RolledBack)
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Something that happened to a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Submit,
    /// An agent claimed the stage's requests
    Claimed,
    /// Every request of the stage completed
    Completed,
    /// A request of the stage failed
    Failed,
    Approve { approver: String },
    Retry,
    DeadlineExceeded,
    Rollback,
}

impl Event {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Claimed => "claimed",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Approve { .. } => "approve",
            Self::Retry => "retry",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Rollback => "rollback",
        }
    }
}

/// Transition errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// Event is not accepted in this stage
    #[error("event '{event}' is not allowed in stage {from}")]
    Illegal { from: Stage, event: &'static str },

    /// Approval without an approver
    #[error("approval requires a non-empty approver")]
    MissingApprover,
}

/// Next stage for `event` in `stage`
///
/// # Errors
/// `Illegal` when the event does not apply; `MissingApprover` for a blank
/// approval
pub fn transition(stage: Stage, event: &Event) -> Result<Stage, TransitionError> {
    use Stage::{
        Created, DevComplete, DevFailed, DevInProgress, DevPending, ProdApproved, ProdComplete,
        ProdFailed, ProdInProgress, RolledBack,
    };

    let next = match (stage, event) {
        (RolledBack, _) => None,
        (_, Event::Rollback) => Some(RolledBack),

        (Created, Event::Submit) => Some(DevPending),
        (DevPending, Event::Claimed) => Some(DevInProgress),
        (DevInProgress, Event::Completed) => Some(DevComplete),
        (DevInProgress, Event::Failed) | (DevPending | DevInProgress, Event::DeadlineExceeded) => {
            Some(DevFailed)
        }
        (DevFailed, Event::Retry) => Some(DevPending),
        (DevComplete, Event::Approve { approver }) => {
            if approver.trim().is_empty() {
                return Err(TransitionError::MissingApprover);
            }
            Some(ProdApproved)
        }
        (ProdApproved, Event::Claimed) => Some(ProdInProgress),
        (ProdInProgress, Event::Completed) => Some(ProdComplete),
        (ProdInProgress, Event::Failed)
        | (ProdApproved | ProdInProgress, Event::DeadlineExceeded) => Some(ProdFailed),

        (
            Created | DevPending | DevInProgress | DevComplete | DevFailed | ProdApproved
            | ProdInProgress | ProdComplete | ProdFailed,
            _,
        ) => None,
    };

    next.ok_or(TransitionError::Illegal {
        from: stage,
        event: event.name(),
    })
}

/// Every stage reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: Stage) -> Vec<Stage> {
    let probes = [
        Event::Submit,
        Event::Claimed,
        Event::Completed,
        Event::Failed,
        Event::Approve {
            approver: "probe".to_string(),
        },
        Event::Retry,
        Event::DeadlineExceeded,
        Event::Rollback,
    ];
    let mut out: Vec<Stage> = Vec::new();
    for event in &probes {
        if let Ok(to) = transition(from, event) {
            if !out.contains(&to) {
                out.push(to);
            }
        }
    }
    out
}
