//! The node agent
//!
//! Two schedules run side by side:
//!
//! - **change-apply**: poll `pending/{server}/`, claim, validate, apply and
//!   publish one Result per request
//! - **drift-scan**: compare every local instance with the baseline and
//!   publish one DriftReport per instance
//!
//! Both take the per-instance lock, so an apply and a scan of the same
//! instance never interleave. A failed cycle is logged and the schedule
//! carries on at the next tick.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use confsync_apply::{
    prune_backups, BackupSink, ConfigUpdater, FileLockRegistry, LocalBackupDir, SafetyValidator,
    StoreBackupSink, TieredBackupSink,
};
use confsync_drift::{BaselineCache, BaselineLoader, DriftDetector, SeverityModel};
use confsync_model::{ChangeOperation, ChangeRequest, ChangeResult, Diagnostic, DriftReport, ReasonCode, RequestId};
use confsync_store::layout::{self, ClaimMarker};
use confsync_store::{get_json_opt, put_json, ObjectStore, StoreError};
use futures::stream::{self, StreamExt};
use serde_json::json;
use tokio::fs;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::AgentConfig;
use crate::error::{AgentError, ConfigError};
use crate::journal::ResultJournal;
use crate::locks::InstanceLocks;
use crate::panel::{HttpPanelClient, PanelApi};

/// What happened to one pending request
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    /// Applied; the Result was published
    Completed(ChangeResult),
    /// Rejected or rolled back; the Result was published
    Failed(ChangeResult),
    /// A Result already existed; nothing was touched
    AlreadyCompleted(ChangeResult),
    /// A journaled Result from an interrupted cycle was published
    Republished(ChangeResult),
    /// Another agent holds the claim marker
    ClaimedElsewhere { holder: String },
    /// The pending object disappeared between list and get
    Vanished,
}

impl RequestOutcome {
    /// The Result behind this outcome, if one was decided or found
    #[must_use]
    pub fn result(&self) -> Option<&ChangeResult> {
        match self {
            Self::Completed(r) | Self::Failed(r) | Self::AlreadyCompleted(r) | Self::Republished(r) => {
                Some(r)
            }
            Self::ClaimedElsewhere { .. } | Self::Vanished => None,
        }
    }
}

/// Outcomes of one change-apply cycle, in list order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyCycleReport {
    /// One entry per listed pending key
    pub outcomes: Vec<(RequestId, RequestOutcome)>,
}

impl ApplyCycleReport {
    #[must_use]
    pub fn outcome(&self, id: &RequestId) -> Option<&RequestOutcome> {
        self.outcomes
            .iter()
            .find_map(|(rid, outcome)| (rid == id).then_some(outcome))
    }
}

/// Cycle counters, mostly for observing the schedules
#[derive(Debug, Default)]
pub struct AgentStats {
    apply_cycles: AtomicU64,
    drift_cycles: AtomicU64,
    failed_cycles: AtomicU64,
}

impl AgentStats {
    #[must_use]
    pub fn apply_cycles(&self) -> u64 {
        self.apply_cycles.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn drift_cycles(&self) -> u64 {
        self.drift_cycles.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failed_cycles(&self) -> u64 {
        self.failed_cycles.load(Ordering::Relaxed)
    }
}

/// Per-node agent
pub struct Agent {
    config: Arc<AgentConfig>,
    store: Arc<dyn ObjectStore>,
    identity: String,
    instance_locks: InstanceLocks,
    validator: SafetyValidator,
    updater: ConfigUpdater,
    backups: Arc<dyn BackupSink>,
    journal: ResultJournal,
    panel: Option<Arc<dyn PanelApi>>,
    detector: DriftDetector,
    baselines: BaselineCache,
    baseline_loader: BaselineLoader,
    stats: AgentStats,
}

impl Agent {
    /// Build an agent from its config and a store handle
    ///
    /// # Errors
    /// Invalid config, or a panel client that cannot be built
    pub fn new(config: Arc<AgentConfig>, store: Arc<dyn ObjectStore>) -> Result<Self, AgentError> {
        config.validate()?;
        let file_locks = FileLockRegistry::new();
        let backups: Arc<dyn BackupSink> = Arc::new(TieredBackupSink::new(
            Arc::new(LocalBackupDir::new(&config.backup_root)),
            Arc::new(StoreBackupSink::new(Arc::clone(&store))),
        ));
        let panel: Option<Arc<dyn PanelApi>> = if config.panel.restarts() {
            let client = HttpPanelClient::from_config(&config.panel)
                .map_err(|e| ConfigError::Invalid(format!("panel: {e}")))?;
            Some(Arc::new(client))
        } else {
            None
        };

        Ok(Self {
            identity: config.identity(),
            instance_locks: InstanceLocks::new(),
            validator: SafetyValidator::new(Arc::clone(&file_locks))
                .with_min_free_bytes(config.min_free_bytes),
            updater: ConfigUpdater::new(Arc::clone(&backups), file_locks),
            backups,
            journal: ResultJournal::new(&config.state_dir),
            panel,
            detector: DriftDetector::new(SeverityModel::from_config(&config.drift)),
            baselines: BaselineCache::new(config.drift.baseline_cache_ttl()),
            baseline_loader: BaselineLoader::new(&config.baseline_root),
            stats: AgentStats::default(),
            store,
            config,
        })
    }

    /// Replace the panel client
    #[must_use]
    pub fn with_panel(mut self, panel: Arc<dyn PanelApi>) -> Self {
        self.panel = Some(panel);
        self
    }

    #[inline]
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn stats(&self) -> &AgentStats {
        &self.stats
    }

    /// Run both schedules until `shutdown` turns `true` (or its sender is
    /// dropped)
    ///
    /// Shutdown is observed between ticks; a cycle in progress finishes.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        info!(
            server = %self.config.server_id,
            identity = %self.identity,
            poll_secs = self.config.poll_interval_secs,
            drift_secs = self.config.drift_interval_secs,
            "Agent started"
        );
        tokio::join!(
            self.apply_schedule(shutdown.clone()),
            self.drift_schedule(shutdown)
        );
        info!(server = %self.config.server_id, "Agent stopped");
    }

    async fn apply_schedule(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }
            match self.run_apply_cycle().await {
                Ok(report) if !report.outcomes.is_empty() => {
                    info!(requests = report.outcomes.len(), "Change-apply cycle finished");
                }
                Ok(_) => debug!("No pending requests"),
                Err(e) => {
                    self.stats.failed_cycles.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "Change-apply cycle failed, retrying next tick");
                }
            }
        }
    }

    async fn drift_schedule(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.drift_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.run_drift_cycle().await {
                self.stats.failed_cycles.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Drift-scan cycle failed, retrying next tick");
            }
        }
    }

    // ------------------------------------------------------------------
    // Change-apply
    // ------------------------------------------------------------------

    /// Process every request currently listed for this server
    ///
    /// # Errors
    /// The store could not be listed or a claim could not be read or
    /// written. Requests processed before the failure keep their Results.
    pub async fn run_apply_cycle(&self) -> Result<ApplyCycleReport, AgentError> {
        let result = self.apply_pending().await;
        self.stats.apply_cycles.fetch_add(1, Ordering::Relaxed);
        result
    }

    async fn apply_pending(&self) -> Result<ApplyCycleReport, AgentError> {
        let keys = self
            .store
            .list(layout::CHANGES, &layout::pending_prefix(&self.config.server_id))
            .await?;
        debug!(pending = keys.len(), "Listed pending requests");

        let mut report = ApplyCycleReport::default();
        for key in keys {
            let Some(id) = layout::request_id_from_pending(&key) else {
                warn!(key = %key, "Ignoring unrecognized pending key");
                continue;
            };
            let outcome = self
                .process_request(&id)
                .instrument(info_span!("request", id = %id))
                .await?;
            report.outcomes.push((id, outcome));
        }
        Ok(report)
    }

    /// Take one pending request through claim, validation and apply
    ///
    /// # Errors
    /// Store failures before a Result could be decided or published
    pub async fn process_request(&self, id: &RequestId) -> Result<RequestOutcome, AgentError> {
        let pending_key = layout::pending_key(&self.config.server_id, id);

        if let Some(existing) =
            get_json_opt::<_, ChangeResult>(&*self.store, layout::CHANGES, &layout::result_key(id)).await?
        {
            debug!("Result already published, dropping stale pending key");
            self.store.delete(layout::CHANGES, &pending_key).await?;
            return Ok(RequestOutcome::AlreadyCompleted(existing));
        }

        if let Some(holder) = self.claim(id).await? {
            debug!(holder = %holder, "Claimed by another agent, skipping");
            return Ok(RequestOutcome::ClaimedElsewhere { holder });
        }

        if let Some(journaled) = self.journal.get(id).await? {
            info!(status = ?journaled.status, "Republishing journaled result");
            self.publish(&journaled).await?;
            return Ok(RequestOutcome::Republished(journaled));
        }

        let bytes = match self.store.get(layout::CHANGES, &pending_key).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                debug!("Pending object vanished, releasing claim");
                self.store.delete(layout::CHANGES, &layout::claim_key(id)).await?;
                return Ok(RequestOutcome::Vanished);
            }
            Err(e) => {
                warn!(error = %e, "Could not download request");
                let result = self.failed(id, vec![store_diagnostic(&e)]).retriable();
                return self.finish(result).await;
            }
        };

        let request = match self.parse_request(id, &bytes) {
            Ok(request) => request,
            Err(diagnostic) => {
                warn!(reason = %diagnostic.message, "Malformed request");
                return self.finish(self.failed(id, vec![diagnostic])).await;
            }
        };

        let age = Utc::now() - request.created_at;
        if age.to_std().is_ok_and(|age| age > self.config.request_deadline()) {
            warn!(age_secs = age.num_seconds(), "Request past its deadline, not applying");
            let diagnostic = Diagnostic::new(
                ReasonCode::DeadlineExceeded,
                format!(
                    "request is {}s old, deadline is {}s",
                    age.num_seconds(),
                    self.config.request_deadline_secs
                ),
            );
            return self.finish(self.failed(id, vec![diagnostic])).await;
        }

        let result = self.apply_request(&request).await;
        if let Some(existing) = self.superseded(&request, &result).await? {
            return Ok(RequestOutcome::AlreadyCompleted(existing));
        }
        self.finish(result).await
    }

    /// A Result someone else published while we were applying, typically a
    /// coordinator deadline. That Result stands: our changes are reverted
    /// from the backups we took and our own Result is dropped.
    async fn superseded(
        &self,
        request: &ChangeRequest,
        ours: &ChangeResult,
    ) -> Result<Option<ChangeResult>, AgentError> {
        let id = &request.id;
        let Some(existing) =
            get_json_opt::<_, ChangeResult>(&*self.store, layout::CHANGES, &layout::result_key(id)).await?
        else {
            return Ok(None);
        };
        warn!(
            status = ?existing.status,
            by = %existing.agent,
            "Result published while applying, keeping it"
        );
        if ours.is_completed() && !ours.backups.is_empty() {
            self.revert(request, ours).await;
        }
        self.store
            .delete(layout::CHANGES, &layout::pending_key(&self.config.server_id, id))
            .await?;
        self.store.delete(layout::CHANGES, &layout::claim_key(id)).await?;
        self.journal.remove(id).await?;
        Ok(Some(existing))
    }

    /// Restore every file `applied` backed up, newest operation first
    async fn revert(&self, request: &ChangeRequest, applied: &ChangeResult) {
        let instance = request.target_instance.as_str();
        let restore = applied
            .backups
            .iter()
            .rev()
            .map(|b| ChangeOperation::restore_file(b.file.clone(), b.key.clone()))
            .fold(
                ChangeRequest::new(&self.config.server_id, instance, &self.identity)
                    .with_id(request.id.derive("revert")),
                ChangeRequest::with_operation,
            );
        let _guard = self.instance_locks.lock(instance).await;
        match self.updater.apply(&self.config.instance_dir(instance), &restore).await {
            Ok(report) => info!(instance, files = report.outcomes.len(), "Applied changes reverted"),
            Err(failure) => error!(instance, error = %failure, "Could not revert applied changes"),
        }
    }

    /// `None` when this agent holds the claim, otherwise the holder
    async fn claim(&self, id: &RequestId) -> Result<Option<String>, AgentError> {
        let key = layout::claim_key(id);
        match get_json_opt::<_, ClaimMarker>(&*self.store, layout::CHANGES, &key).await? {
            Some(marker) if marker.agent != self.identity => Ok(Some(marker.agent)),
            Some(_) => {
                debug!("Resuming our own claim");
                Ok(None)
            }
            None => {
                put_json(&*self.store, layout::CHANGES, &key, &ClaimMarker::new(&self.identity)).await?;
                debug!("Claimed");
                Ok(None)
            }
        }
    }

    fn parse_request(&self, id: &RequestId, bytes: &[u8]) -> Result<ChangeRequest, Diagnostic> {
        let malformed = |message: String| Diagnostic::new(ReasonCode::MalformedRequest, message);
        let request: ChangeRequest =
            serde_json::from_slice(bytes).map_err(|e| malformed(format!("request does not parse: {e}")))?;
        if &request.id != id {
            return Err(malformed(format!("request id '{}' does not match its key", request.id)));
        }
        if request.target_server != self.config.server_id {
            return Err(malformed(format!(
                "request targets server '{}', this is '{}'",
                request.target_server, self.config.server_id
            )));
        }
        request.validate_shape().map_err(|e| malformed(e.to_string()))?;
        Ok(request)
    }

    async fn apply_request(&self, request: &ChangeRequest) -> ChangeResult {
        let instance = request.target_instance.as_str();
        let _guard = self.instance_locks.lock(instance).await;

        if let Err(e) = self.validator.validate(&self.config.instances_root, request) {
            warn!(instance, violations = e.violations.len(), error = %e, "Validation failed, nothing applied");
            return self.failed(&request.id, e.diagnostics());
        }

        let instance_dir = self.config.instance_dir(instance);
        let mut result = match self.updater.apply(&instance_dir, request).await {
            Ok(report) => {
                let mut result = ChangeResult::completed(request.id.clone(), &self.identity);
                result.applied_operations = report.outcomes;
                result.backups = report.backups;
                result
            }
            Err(failure) => {
                warn!(
                    instance,
                    failed_index = ?failure.failed_index,
                    restored = failure.restored.len(),
                    error = %failure,
                    "Apply failed, touched files rolled back"
                );
                if !failure.rollback_errors.is_empty() {
                    error!(instance, errors = ?failure.rollback_errors, "Rollback incomplete");
                }
                let diagnostic = Diagnostic::new(failure.error.reason_code(), failure.to_string())
                    .with_detail(json!({
                        "operation": failure.failed_index,
                        "restored": failure.restored,
                        "rollback_errors": failure.rollback_errors,
                    }));
                self.failed(&request.id, vec![diagnostic])
            }
        };

        if result.is_completed() {
            if let Err(e) = self.journal.record(&result).await {
                warn!(error = %e, "Could not journal result before restart");
            }
            if let Some(diagnostic) = self.restart_instance(instance).await {
                result.diagnostics.push(diagnostic);
            }
        }

        match prune_backups(&*self.backups, instance, &self.config.retention, Utc::now()).await {
            Ok(0) => {}
            Ok(removed) => debug!(instance, removed, "Old backups pruned"),
            Err(e) => warn!(instance, error = %e, "Backup pruning failed"),
        }
        result
    }

    /// Restart diagnostic, if the restart was attempted and failed
    async fn restart_instance(&self, instance: &str) -> Option<Diagnostic> {
        let panel = self.panel.as_ref()?;
        match panel.restart(instance).await {
            Ok(()) => None,
            Err(e) => {
                warn!(instance, error = %e, "Panel restart failed");
                Some(Diagnostic::new(
                    ReasonCode::PanelRestartFailed,
                    format!("restart of '{instance}' failed: {e}"),
                ))
            }
        }
    }

    /// Journal and publish a decided Result
    async fn finish(&self, result: ChangeResult) -> Result<RequestOutcome, AgentError> {
        self.journal.record(&result).await?;
        self.publish(&result).await?;
        if result.is_completed() {
            info!(request = %result.request_id, backups = result.backups.len(), "Request completed");
            Ok(RequestOutcome::Completed(result))
        } else {
            info!(request = %result.request_id, reason = ?result.primary_reason(), "Request failed");
            Ok(RequestOutcome::Failed(result))
        }
    }

    /// Write the Result, then retire the pending key, the claim and the
    /// journal entry
    async fn publish(&self, result: &ChangeResult) -> Result<(), AgentError> {
        let id = &result.request_id;
        put_json(&*self.store, layout::CHANGES, &layout::result_key(id), result).await?;
        self.store
            .delete(layout::CHANGES, &layout::pending_key(&self.config.server_id, id))
            .await?;
        self.store.delete(layout::CHANGES, &layout::claim_key(id)).await?;
        self.journal.remove(id).await
    }

    fn failed(&self, id: &RequestId, diagnostics: Vec<Diagnostic>) -> ChangeResult {
        ChangeResult::failed(id.clone(), &self.identity, diagnostics)
    }

    // ------------------------------------------------------------------
    // Drift-scan
    // ------------------------------------------------------------------

    /// Scan every local instance and publish one report each
    ///
    /// # Errors
    /// Baseline or instance directory unreadable, or a report could not be
    /// published (reported after every instance was tried)
    pub async fn run_drift_cycle(&self) -> Result<Vec<DriftReport>, AgentError> {
        let result = self.scan_all().await;
        self.stats.drift_cycles.fetch_add(1, Ordering::Relaxed);
        result
    }

    async fn scan_all(&self) -> Result<Vec<DriftReport>, AgentError> {
        let instances = self.local_instances().await?;
        if instances.is_empty() {
            debug!("No local instances to scan");
            return Ok(Vec::new());
        }

        let results: Vec<Result<DriftReport, AgentError>> = stream::iter(instances)
            .map(|instance| async move { self.scan_and_publish(&instance).await })
            .buffer_unordered(self.config.drift_concurrency)
            .collect()
            .await;

        let mut reports = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!(error = %e, "Drift report not published");
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        reports.sort_by(|a, b| a.instance.cmp(&b.instance));
        let items: usize = reports.iter().map(|r| r.items.len()).sum();
        info!(instances = reports.len(), items, "Drift-scan cycle finished");
        Ok(reports)
    }

    async fn scan_and_publish(&self, instance: &str) -> Result<DriftReport, AgentError> {
        let report = self.scan_locked(instance, true).await?;
        let key = layout::drift_report_key(instance, report.scan_time);
        put_json(&*self.store, layout::DRIFT_REPORTS, &key, &report).await?;
        debug!(instance, key = %key, "Drift report published");
        Ok(report)
    }

    /// Scan one instance without publishing or touching the flag history
    ///
    /// # Errors
    /// The baseline could not be loaded
    pub async fn scan_instance(&self, instance: &str) -> Result<DriftReport, AgentError> {
        self.scan_locked(instance, false).await
    }

    async fn scan_locked(&self, instance: &str, record: bool) -> Result<DriftReport, AgentError> {
        let baseline = self.baselines.get_or_load(&self.baseline_loader).await?;
        let _guard = self.instance_locks.lock(instance).await;
        let dir = self.config.instance_dir(instance);
        let now = Utc::now();
        let report = if record {
            self.detector.scan(instance, &dir, &baseline, now).await
        } else {
            self.detector.peek(instance, &dir, &baseline, now).await
        };
        Ok(report)
    }

    /// Instance directory names, sorted; hidden entries are skipped
    ///
    /// # Errors
    /// The instances root cannot be read
    pub async fn local_instances(&self) -> Result<Vec<String>, AgentError> {
        let root: &PathBuf = &self.config.instances_root;
        let mut entries = fs::read_dir(root).await.map_err(|e| AgentError::io(root, e))?;
        let mut instances = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| AgentError::io(root, e))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
            if is_dir && !name.starts_with('.') {
                instances.push(name);
            }
        }
        instances.sort();
        Ok(instances)
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender counts as shutdown
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn store_diagnostic(e: &StoreError) -> Diagnostic {
    Diagnostic::new(e.reason_code(), e.to_string())
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("server", &self.config.server_id)
            .field("identity", &self.identity)
            .field("panel", &self.panel.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confsync_test_utils::{memory_store, NodeFixture, SERVER};

    #[tokio::test]
    async fn local_instances_skip_files_and_hidden_dirs() {
        let node = NodeFixture::new()
            .with_instance("survival")
            .with_instance("lobby")
            .with_instance(".trash");
        std::fs::write(node.instances_root().join("notes.txt"), b"x").unwrap();
        let config = Arc::new(AgentConfig::new(SERVER).with_node_root(node.root()));
        let agent = Agent::new(config, memory_store()).unwrap();
        assert_eq!(agent.local_instances().await.unwrap(), vec!["lobby", "survival"]);
    }

    #[test]
    fn outcome_exposes_result() {
        let result = ChangeResult::completed(RequestId::from("r"), "a");
        assert_eq!(RequestOutcome::Completed(result.clone()).result(), Some(&result));
        assert_eq!(RequestOutcome::Vanished.result(), None);
    }
}
