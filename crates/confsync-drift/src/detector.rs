//! Drift detector
//!
//! Compares one instance's plugin files with the baseline and scores each
//! divergence. The detector remembers when each divergence was first
//! flagged in its current uninterrupted run of scans, so a divergence that
//! was only just reported is damped while a long-standing one regains full
//! weight. A divergence missing from a scan starts over.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use confsync_model::{DriftItem, DriftKind, DriftReport, KeyPath};
use dashmap::DashMap;
use tokio::fs;
use tracing::{debug, info};

use crate::baseline::{Baseline, BaselineFile};
use crate::compare::{diff_trees, Divergence};
use crate::severity::SeverityModel;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FlagKey {
    instance: String,
    file: String,
    key_path: String,
    kind: DriftKind,
}

/// Scores divergences and tracks how long each has been flagged
#[derive(Debug, Default)]
pub struct DriftDetector {
    model: SeverityModel,
    flagged_since: DashMap<FlagKey, DateTime<Utc>>,
}

impl DriftDetector {
    #[must_use]
    pub fn new(model: SeverityModel) -> Self {
        Self {
            model,
            flagged_since: DashMap::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn model(&self) -> &SeverityModel {
        &self.model
    }

    /// Scan one instance directory against `baseline` and update the flag
    /// history of that instance
    ///
    /// Never fails: unreadable or unparsable files become report items.
    pub async fn scan(&self, instance: &str, instance_dir: &Path, baseline: &Baseline, now: DateTime<Utc>) -> DriftReport {
        self.scan_with(instance, instance_dir, baseline, now, true).await
    }

    /// Like [`scan`](Self::scan), but scores against the current history
    /// without changing it
    pub async fn peek(&self, instance: &str, instance_dir: &Path, baseline: &Baseline, now: DateTime<Utc>) -> DriftReport {
        self.scan_with(instance, instance_dir, baseline, now, false).await
    }

    async fn scan_with(
        &self,
        instance: &str,
        instance_dir: &Path,
        baseline: &Baseline,
        now: DateTime<Utc>,
        record: bool,
    ) -> DriftReport {
        let mut items = Vec::new();
        let mut seen = HashSet::new();
        for file in baseline.files() {
            let divergences = self.compare_file(instance_dir, file).await;
            debug!(
                instance,
                plugin = %file.plugin,
                file = %file.file,
                divergences = divergences.len(),
                "Compared baseline file"
            );
            for d in divergences {
                let key = FlagKey {
                    instance: instance.to_string(),
                    file: file.instance_path(),
                    key_path: d.key_path.to_string(),
                    kind: d.kind,
                };
                let since = self.flagged_for(&key, now, record);
                items.push(self.score(instance, file, d, since));
                seen.insert(key);
            }
        }
        if record {
            // Resolved divergences start over if they come back
            self.flagged_since
                .retain(|key, _| key.instance != instance || seen.contains(key));
        }
        sort_items(&mut items);

        info!(instance, items = items.len(), "Drift scan complete");
        DriftReport {
            instance: instance.to_string(),
            scan_time: now,
            items,
        }
    }

    /// Pure per-file comparison (unscored)
    pub async fn compare_file(&self, instance_dir: &Path, file: &BaselineFile) -> Vec<Divergence> {
        let path = instance_dir.join(file.instance_path());
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return vec![whole_file(
                    DriftKind::Missing,
                    file,
                    format!("'{}' does not exist", file.instance_path()),
                )];
            }
            Err(e) => {
                return vec![whole_file(
                    DriftKind::ValueMismatch,
                    file,
                    format!("cannot read '{}': {e}", file.instance_path()),
                )];
            }
        };
        let parsed = String::from_utf8(bytes)
            .map_err(|_| "file is not valid UTF-8".to_string())
            .and_then(|text| file.format.parse(&text).map_err(|e| e.to_string()));
        match parsed {
            Ok(current) => diff_trees(&file.tree, &current),
            Err(reason) => vec![whole_file(DriftKind::ValueMismatch, file, reason)],
        }
    }

    /// Time since `key` was first flagged, `None` for a new divergence
    fn flagged_for(&self, key: &FlagKey, now: DateTime<Utc>, record: bool) -> Option<Duration> {
        let started = self.flagged_since.get(key).map(|entry| *entry);
        match started {
            Some(started) => Some((now - started).to_std().unwrap_or(Duration::ZERO)),
            None => {
                if record {
                    self.flagged_since.insert(key.clone(), now);
                }
                None
            }
        }
    }

    fn score(&self, instance: &str, file: &BaselineFile, d: Divergence, since: Option<Duration>) -> DriftItem {
        let severity_score = self.model.score(d.kind, &file.plugin, &d.key_path, instance, since);

        DriftItem {
            plugin: file.plugin.clone(),
            file: file.instance_path(),
            key_path: d.key_path,
            baseline_value: d.baseline,
            current_value: d.current,
            kind: d.kind,
            severity_score,
            reason: d.reason,
        }
    }

    /// Forget flag history (all instances)
    pub fn reset_history(&self) {
        self.flagged_since.clear();
    }

    /// Number of divergences currently being tracked
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.flagged_since.len()
    }
}

fn whole_file(kind: DriftKind, file: &BaselineFile, reason: String) -> Divergence {
    Divergence {
        key_path: KeyPath::root(),
        kind,
        baseline: Some(file.tree.clone()),
        current: None,
        reason,
    }
}

/// Score descending, then plugin, key path and file ascending
pub fn sort_items(items: &mut [DriftItem]) {
    items.sort_by(|a, b| {
        b.severity_score
            .total_cmp(&a.severity_score)
            .then_with(|| a.plugin.cmp(&b.plugin))
            .then_with(|| a.key_path.to_string().cmp(&b.key_path.to_string()))
            .then_with(|| a.file.cmp(&b.file))
    });
}
