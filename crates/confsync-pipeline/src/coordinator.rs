//! Deployment coordinator
//!
//! Drives deployments through their stages using only the object store:
//! it enqueues change requests, watches claim markers and results, and
//! records every transition. All methods load the deployment, act, and
//! persist it again, so any number of `advance` calls are safe.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use confsync_model::{
    ChangeOperation, ChangeRequest, ChangeResult, Diagnostic, ReasonCode, RequestId, ResultStatus,
};
use confsync_store::layout::{self, ClaimMarker};
use confsync_store::{get_json_opt, put_json, ObjectStore, StoreError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::deployment::{Deployment, DeploymentSpec, TargetRun};
use crate::error::PipelineError;
use crate::stage::{transition, Event, Stage};

const COORDINATOR: &str = "coordinator";

/// Pipeline settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// How long a Pending or InProgress stage may last
    pub stage_deadline_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_deadline_secs: 24 * 60 * 60,
        }
    }
}

impl PipelineConfig {
    #[inline]
    #[must_use]
    pub fn stage_deadline(&self) -> Duration {
        Duration::from_secs(self.stage_deadline_secs)
    }
}

enum Observation {
    Idle,
    Claimed,
    Settled(ChangeResult),
}

/// Store-backed deployment driver
#[derive(Clone)]
pub struct Coordinator {
    store: Arc<dyn ObjectStore>,
    config: PipelineConfig,
}

impl Coordinator {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, config: PipelineConfig) -> Self {
        Self { store, config }
    }

    /// Persist a new deployment, submit it and enqueue the dev requests
    ///
    /// # Errors
    /// `Invalid` for an empty target list or operations that would not
    /// form a valid request; store failures
    pub async fn create(&self, spec: DeploymentSpec, now: DateTime<Utc>) -> Result<Deployment, PipelineError> {
        if spec.dev_targets.is_empty() {
            return Err(PipelineError::Invalid("at least one dev target is required".into()));
        }
        for target in spec.dev_targets.iter().chain(&spec.prod_targets) {
            let probe = request_for(&target.server, &target.instance, RequestId::new(), &spec.operations, &spec.created_by, now);
            probe
                .validate_shape()
                .map_err(|e| PipelineError::Invalid(e.to_string()))?;
        }

        let creator = spec.created_by.clone();
        let mut deployment = Deployment::new(spec, now);
        deployment.apply(Event::Submit, &creator, now)?;
        deployment.dev_runs = deployment
            .dev_targets
            .iter()
            .enumerate()
            .map(|(n, t)| TargetRun::new(t.clone(), deployment.dev_request_id(n)))
            .collect();
        self.enqueue(&deployment, &deployment.dev_runs, now).await?;
        self.save(&deployment).await?;
        info!(deployment = %deployment.id, targets = deployment.dev_runs.len(), "Deployment created");
        Ok(deployment)
    }

    /// Current state
    ///
    /// # Errors
    /// `NotFound` for an unknown id; store failures
    pub async fn status(&self, id: &str) -> Result<Deployment, PipelineError> {
        get_json_opt(&*self.store, layout::DEPLOYMENTS, &layout::deployment_key(id))
            .await?
            .ok_or_else(|| PipelineError::NotFound(id.to_string()))
    }

    /// Ids of every stored deployment
    ///
    /// # Errors
    /// Store failures
    pub async fn list(&self) -> Result<Vec<String>, PipelineError> {
        let keys = self.store.list(layout::DEPLOYMENTS, "").await?;
        Ok(keys
            .iter()
            .filter_map(|k| k.strip_suffix(".json"))
            .map(str::to_string)
            .collect())
    }

    /// Fold observed claims and results into the deployment
    ///
    /// On a rolled-back deployment this inverts runs whose results arrived
    /// after the rollback.
    ///
    /// # Errors
    /// `NotFound`; store failures
    pub async fn advance(&self, id: &str, now: DateTime<Utc>) -> Result<Deployment, PipelineError> {
        let mut deployment = self.status(id).await?;
        if deployment.stage == Stage::RolledBack {
            return self.settle_rollback(deployment, now).await;
        }
        if !deployment.stage.is_active() {
            return Ok(deployment);
        }
        let before = deployment.history.len();

        let mut claimed = false;
        for run in deployment.current_runs_mut().iter_mut() {
            if run.is_settled() {
                claimed = true;
                continue;
            }
            match self.observe(&run.request_id).await? {
                Observation::Idle => {}
                Observation::Claimed => claimed = true,
                Observation::Settled(result) => {
                    debug!(request = %run.request_id, status = ?result.status, "Result observed");
                    run.status = Some(result.status);
                    run.backups = result.backups;
                    claimed = true;
                }
            }
        }
        let runs = deployment.current_runs();
        claimed |= runs.is_empty();
        let any_failed = runs.iter().any(|r| r.status == Some(ResultStatus::Failed));
        let all_settled = runs.iter().all(TargetRun::is_settled);

        if claimed && matches!(deployment.stage, Stage::DevPending | Stage::ProdApproved) {
            deployment.apply(Event::Claimed, COORDINATOR, now)?;
        }
        if matches!(deployment.stage, Stage::DevInProgress | Stage::ProdInProgress) {
            if any_failed {
                self.cancel_outstanding(&deployment).await?;
                deployment.apply(Event::Failed, COORDINATOR, now)?;
            } else if all_settled {
                deployment.apply(Event::Completed, COORDINATOR, now)?;
            }
        }
        if deployment.stage.is_active() && self.expired(&deployment, now) {
            if let Some(live) = self.live_claim(&deployment, now).await? {
                debug!(request = %live, "Stage deadline passed, waiting for a live claim");
            } else {
                self.expire_outstanding(&mut deployment).await?;
                deployment.apply(Event::DeadlineExceeded, COORDINATOR, now)?;
            }
        }

        if deployment.history.len() != before {
            self.save(&deployment).await?;
        }
        Ok(deployment)
    }

    /// Approve prod after a successful dev stage and enqueue prod requests
    ///
    /// # Errors
    /// `Transition` unless the deployment is `DevComplete` and `approver`
    /// is non-empty; store failures
    pub async fn approve(&self, id: &str, approver: &str, now: DateTime<Utc>) -> Result<Deployment, PipelineError> {
        let mut deployment = self.status(id).await?;
        deployment.apply(
            Event::Approve {
                approver: approver.to_string(),
            },
            approver,
            now,
        )?;
        deployment.approver = Some(approver.to_string());
        deployment.prod_runs = deployment
            .prod_targets
            .iter()
            .enumerate()
            .map(|(n, t)| TargetRun::new(t.clone(), deployment.prod_request_id(n)))
            .collect();
        self.enqueue(&deployment, &deployment.prod_runs, now).await?;
        self.save(&deployment).await?;
        Ok(deployment)
    }

    /// Re-enqueue the dev targets that did not complete, under fresh ids
    ///
    /// # Errors
    /// `Transition` unless the deployment is `DevFailed`; store failures
    pub async fn retry(&self, id: &str, actor: &str, now: DateTime<Utc>) -> Result<Deployment, PipelineError> {
        let mut deployment = self.status(id).await?;
        deployment.apply(Event::Retry, actor, now)?;
        deployment.dev_attempt += 1;

        let mut fresh = Vec::new();
        for n in 0..deployment.dev_runs.len() {
            if deployment.dev_runs[n].status == Some(ResultStatus::Completed) {
                continue;
            }
            let run = TargetRun::new(deployment.dev_runs[n].target.clone(), deployment.dev_request_id(n));
            fresh.push(run.clone());
            deployment.dev_runs[n] = run;
        }
        self.enqueue(&deployment, &fresh, now).await?;
        self.save(&deployment).await?;
        Ok(deployment)
    }

    /// Roll back: cancel pending requests and restore every completed
    /// target from the backups its result recorded
    ///
    /// Requests an agent is still applying cannot be cancelled. They are
    /// kept as awaiting rollback and inverted by [`advance`](Self::advance)
    /// once their result shows up.
    ///
    /// # Errors
    /// `Transition` if already rolled back; store failures
    pub async fn rollback(&self, id: &str, requested_by: &str, now: DateTime<Utc>) -> Result<Deployment, PipelineError> {
        let mut deployment = self.status(id).await?;
        transition(deployment.stage, &Event::Rollback)?;

        // Withdraw before looking: an agent that claims afterwards finds
        // nothing to download
        let mut awaiting = Vec::new();
        for run in deployment.dev_runs.iter_mut().chain(deployment.prod_runs.iter_mut()) {
            if run.is_settled() {
                continue;
            }
            self.withdraw(run).await?;
            match self.observe(&run.request_id).await? {
                Observation::Settled(result) => {
                    run.status = Some(result.status);
                    run.backups = result.backups;
                }
                Observation::Claimed => awaiting.push(run.clone()),
                Observation::Idle => {}
            }
        }

        let mut inverse = Vec::new();
        for run in deployment.dev_runs.iter().chain(&deployment.prod_runs) {
            if let Some(request) = self.invert(run, requested_by, now).await? {
                inverse.push(request);
            }
        }

        deployment.apply(Event::Rollback, requested_by, now)?;
        info!(
            deployment = %deployment.id,
            inverse = inverse.len(),
            awaiting = awaiting.len(),
            "Rollback issued"
        );
        deployment.rollback_requests = inverse;
        deployment.awaiting_rollback = awaiting;
        self.save(&deployment).await?;
        Ok(deployment)
    }

    /// Invert runs that were still being applied when the rollback was
    /// issued, as their results arrive
    async fn settle_rollback(&self, mut deployment: Deployment, now: DateTime<Utc>) -> Result<Deployment, PipelineError> {
        if deployment.awaiting_rollback.is_empty() {
            return Ok(deployment);
        }
        let requested_by = deployment
            .history
            .iter()
            .rev()
            .find(|h| h.to == Stage::RolledBack)
            .map_or_else(|| COORDINATOR.to_string(), |h| h.actor.clone());

        let mut still_waiting = Vec::new();
        let mut changed = false;
        for mut run in std::mem::take(&mut deployment.awaiting_rollback) {
            let result = match self.observe(&run.request_id).await? {
                Observation::Settled(result) => result,
                Observation::Claimed => {
                    still_waiting.push(run);
                    continue;
                }
                Observation::Idle => {
                    // Claim released without a Result: the request was
                    // withdrawn before the agent could download it
                    debug!(request = %run.request_id, "Claim released, nothing to roll back");
                    changed = true;
                    continue;
                }
            };
            debug!(request = %run.request_id, status = ?result.status, "Late result after rollback");
            run.status = Some(result.status);
            run.backups = result.backups;
            if let Some(request) = self.invert(&run, &requested_by, now).await? {
                deployment.rollback_requests.push(request);
            }
            deployment.record_run(&run);
            changed = true;
        }
        deployment.awaiting_rollback = still_waiting;

        if changed {
            info!(
                deployment = %deployment.id,
                inverse = deployment.rollback_requests.len(),
                awaiting = deployment.awaiting_rollback.len(),
                "Late results rolled back"
            );
            self.save(&deployment).await?;
        }
        Ok(deployment)
    }

    /// Enqueue the inverse of a completed run, if it recorded backups
    async fn invert(&self, run: &TargetRun, requested_by: &str, now: DateTime<Utc>) -> Result<Option<RequestId>, StoreError> {
        if run.status != Some(ResultStatus::Completed) || run.backups.is_empty() {
            return Ok(None);
        }
        let operations: Vec<ChangeOperation> = run
            .backups
            .iter()
            .rev()
            .map(|b| ChangeOperation::restore_file(b.file.clone(), b.key.clone()))
            .collect();
        let request = request_for(
            &run.target.server,
            &run.target.instance,
            run.request_id.derive("rb"),
            &operations,
            requested_by,
            now,
        );
        put_json(
            &*self.store,
            layout::CHANGES,
            &layout::pending_key(&request.target_server, &request.id),
            &request,
        )
        .await?;
        Ok(Some(request.id))
    }

    async fn observe(&self, id: &RequestId) -> Result<Observation, StoreError> {
        if let Some(result) = get_json_opt(&*self.store, layout::CHANGES, &layout::result_key(id)).await? {
            return Ok(Observation::Settled(result));
        }
        if self.store.exists(layout::CHANGES, &layout::claim_key(id)).await? {
            return Ok(Observation::Claimed);
        }
        Ok(Observation::Idle)
    }

    fn expired(&self, deployment: &Deployment, now: DateTime<Utc>) -> bool {
        (now - deployment.stage_entered_at)
            .to_std()
            .is_ok_and(|elapsed| elapsed >= self.config.stage_deadline())
    }

    /// An unsettled run whose claim is younger than the stage deadline
    ///
    /// Its agent may be mid-apply and will publish its own Result, so the
    /// stage is not expired underneath it.
    async fn live_claim(&self, deployment: &Deployment, now: DateTime<Utc>) -> Result<Option<RequestId>, StoreError> {
        for run in deployment.current_runs() {
            if run.is_settled() {
                continue;
            }
            let marker: Option<ClaimMarker> =
                get_json_opt(&*self.store, layout::CHANGES, &layout::claim_key(&run.request_id)).await?;
            let fresh = marker.is_some_and(|m| {
                (now - m.claimed_at)
                    .to_std()
                    .map_or(true, |age| age < self.config.stage_deadline())
            });
            if fresh {
                return Ok(Some(run.request_id.clone()));
            }
        }
        Ok(None)
    }

    /// Write Failed results for unsettled requests and withdraw them
    async fn expire_outstanding(&self, deployment: &mut Deployment) -> Result<(), StoreError> {
        let deadline = self.config.stage_deadline_secs;
        for run in deployment.current_runs_mut().iter_mut() {
            if run.is_settled() {
                continue;
            }
            warn!(request = %run.request_id, "Request exceeded the stage deadline");
            let key = layout::result_key(&run.request_id);
            if get_json_opt::<_, ChangeResult>(&*self.store, layout::CHANGES, &key).await?.is_none() {
                let result = ChangeResult::failed(
                    run.request_id.clone(),
                    COORDINATOR,
                    vec![Diagnostic::new(
                        ReasonCode::DeadlineExceeded,
                        format!("no result within {deadline}s"),
                    )],
                );
                put_json(&*self.store, layout::CHANGES, &key, &result).await?;
            }
            self.store
                .delete(layout::CHANGES, &layout::pending_key(&run.target.server, &run.request_id))
                .await?;
            run.status = Some(ResultStatus::Failed);
        }
        Ok(())
    }

    /// Withdraw unsettled requests of the current stage
    async fn cancel_outstanding(&self, deployment: &Deployment) -> Result<(), StoreError> {
        for run in deployment.current_runs() {
            if !run.is_settled() {
                self.withdraw(run).await?;
            }
        }
        Ok(())
    }

    async fn withdraw(&self, run: &TargetRun) -> Result<(), StoreError> {
        debug!(request = %run.request_id, "Withdrawing pending request");
        self.store
            .delete(layout::CHANGES, &layout::pending_key(&run.target.server, &run.request_id))
            .await
    }

    async fn enqueue(&self, deployment: &Deployment, runs: &[TargetRun], now: DateTime<Utc>) -> Result<(), StoreError> {
        for run in runs {
            let request = request_for(
                &run.target.server,
                &run.target.instance,
                run.request_id.clone(),
                &deployment.operations,
                &deployment.created_by,
                now,
            );
            put_json(
                &*self.store,
                layout::CHANGES,
                &layout::pending_key(&run.target.server, &run.request_id),
                &request,
            )
            .await?;
            debug!(request = %run.request_id, server = %run.target.server, "Request enqueued");
        }
        Ok(())
    }

    async fn save(&self, deployment: &Deployment) -> Result<(), StoreError> {
        put_json(
            &*self.store,
            layout::DEPLOYMENTS,
            &layout::deployment_key(&deployment.id),
            deployment,
        )
        .await
    }
}

fn request_for(
    server: &str,
    instance: &str,
    id: RequestId,
    operations: &[ChangeOperation],
    created_by: &str,
    now: DateTime<Utc>,
) -> ChangeRequest {
    operations.iter().cloned().fold(
        ChangeRequest::new(server, instance, created_by)
            .with_id(id)
            .with_created_at(now),
        ChangeRequest::with_operation,
    )
}
