//! Deployment records
//!
//! A deployment is persisted as one JSON object in the `deployments`
//! bucket. Every transition goes through [`Deployment::apply`], which
//! appends to the history.

use chrono::{DateTime, Utc};
use confsync_model::{BackupRef, ChangeOperation, RequestId, ResultStatus};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::stage::{transition, Event, Stage, TransitionError};

/// A server instance a deployment targets
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub server: String,
    pub instance: String,
}

impl Target {
    #[must_use]
    pub fn new(server: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            instance: instance.into(),
        }
    }
}

/// One enqueued request for one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRun {
    pub target: Target,
    pub request_id: RequestId,
    /// Set once the request's result was observed
    #[serde(default)]
    pub status: Option<ResultStatus>,
    #[serde(default)]
    pub backups: Vec<BackupRef>,
}

impl TargetRun {
    #[must_use]
    pub fn new(target: Target, request_id: RequestId) -> Self {
        Self {
            target,
            request_id,
            status: None,
            backups: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.status.is_some()
    }
}

/// One recorded transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub from: Stage,
    pub to: Stage,
    pub event: Event,
    pub actor: String,
    pub at: DateTime<Utc>,
}

/// What to deploy where
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub dev_targets: Vec<Target>,
    pub prod_targets: Vec<Target>,
    pub operations: Vec<ChangeOperation>,
    pub created_by: String,
}

/// Deployment state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    /// Root id all request ids derive from
    pub change_request_id: RequestId,
    pub stage: Stage,
    pub history: Vec<HistoryEntry>,
    pub dev_targets: Vec<Target>,
    pub prod_targets: Vec<Target>,
    pub operations: Vec<ChangeOperation>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub stage_entered_at: DateTime<Utc>,
    #[serde(default)]
    pub dev_runs: Vec<TargetRun>,
    #[serde(default)]
    pub prod_runs: Vec<TargetRun>,
    #[serde(default)]
    pub dev_attempt: u32,
    #[serde(default)]
    pub approver: Option<String>,
    #[serde(default)]
    pub rollback_requests: Vec<RequestId>,
    /// Runs still being applied when the rollback was issued
    #[serde(default)]
    pub awaiting_rollback: Vec<TargetRun>,
}

impl Deployment {
    /// Fresh deployment in `Created`
    #[must_use]
    pub fn new(spec: DeploymentSpec, at: DateTime<Utc>) -> Self {
        let root = RequestId::new();
        Self {
            id: root.to_string(),
            change_request_id: root,
            stage: Stage::Created,
            history: Vec::new(),
            dev_targets: spec.dev_targets,
            prod_targets: spec.prod_targets,
            operations: spec.operations,
            created_by: spec.created_by,
            created_at: at,
            stage_entered_at: at,
            dev_runs: Vec::new(),
            prod_runs: Vec::new(),
            dev_attempt: 0,
            approver: None,
            rollback_requests: Vec::new(),
            awaiting_rollback: Vec::new(),
        }
    }

    /// Apply `event`, recording the transition
    ///
    /// # Errors
    /// The stage is left unchanged when the transition is not allowed
    pub fn apply(&mut self, event: Event, actor: &str, at: DateTime<Utc>) -> Result<Stage, TransitionError> {
        let from = self.stage;
        let to = transition(from, &event)?;
        info!(deployment = %self.id, %from, %to, event = event.name(), actor, "Deployment transition");
        self.history.push(HistoryEntry {
            from,
            to,
            event,
            actor: actor.to_string(),
            at,
        });
        self.stage = to;
        self.stage_entered_at = at;
        Ok(to)
    }

    /// Runs of the stage currently (or last) active
    #[must_use]
    pub fn current_runs(&self) -> &[TargetRun] {
        if self.stage.is_prod() {
            &self.prod_runs
        } else {
            &self.dev_runs
        }
    }

    pub(crate) fn current_runs_mut(&mut self) -> &mut Vec<TargetRun> {
        if self.stage.is_prod() {
            &mut self.prod_runs
        } else {
            &mut self.dev_runs
        }
    }

    /// Copy a settled run back over the run with the same request id
    pub(crate) fn record_run(&mut self, settled: &TargetRun) {
        if let Some(run) = self
            .dev_runs
            .iter_mut()
            .chain(self.prod_runs.iter_mut())
            .find(|r| r.request_id == settled.request_id)
        {
            run.clone_from(settled);
        }
    }

    /// Request id for the `n`th dev target of the current attempt
    #[must_use]
    pub fn dev_request_id(&self, n: usize) -> RequestId {
        if self.dev_attempt == 0 {
            self.change_request_id.derive(&format!("dev-{n}"))
        } else {
            self.change_request_id
                .derive(&format!("dev-{n}-r{}", self.dev_attempt))
        }
    }

    #[must_use]
    pub fn prod_request_id(&self, n: usize) -> RequestId {
        self.change_request_id.derive(&format!("prod-{n}"))
    }
}
