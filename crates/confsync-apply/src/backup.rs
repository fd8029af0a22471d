//! Backups and retention
//!
//! A [`Backup`] is the exact bytes of one file, captured before the first
//! mutation of that file in a request. Sinks persist backups under the
//! `backups` key layout (`{instance}/{plugin}/{timestamp}_{filename}`), so a
//! local directory and the store bucket hold the same keys.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use confsync_model::{BackupRef, ContentHash};
use confsync_store::layout::{self, BackupKey};
use confsync_store::ObjectStore;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::BackupError;

/// Exact snapshot of one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    pub key: BackupKey,
    /// File relative to the instance directory
    pub file: String,
    pub bytes: Vec<u8>,
    pub checksum: ContentHash,
}

impl Backup {
    /// Snapshot `bytes` of `file` taken at `taken_at`
    #[must_use]
    pub fn capture(instance: &str, file: &str, bytes: Vec<u8>, taken_at: DateTime<Utc>) -> Self {
        Self {
            key: BackupKey::for_file(instance, file, taken_at),
            file: file.to_string(),
            checksum: ContentHash::compute(&bytes),
            bytes,
        }
    }

    /// Reference recorded in results
    #[must_use]
    pub fn to_ref(&self) -> BackupRef {
        BackupRef {
            file: self.file.clone(),
            key: self.key.key(),
            checksum: self.checksum,
            size: self.bytes.len() as u64,
        }
    }
}

/// Where backups go
#[async_trait]
pub trait BackupSink: Send + Sync {
    /// Persist a backup under its key
    async fn persist(&self, backup: &Backup) -> Result<(), BackupError>;

    /// Bytes of a stored backup
    ///
    /// # Errors
    /// `BackupError::Missing` if no backup has this key
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, BackupError>;

    /// Keys of all backups of one instance
    async fn list(&self, instance: &str) -> Result<Vec<String>, BackupError>;

    /// Delete one backup
    async fn remove(&self, key: &str) -> Result<(), BackupError>;
}

/// Backups in a local directory: `root/{key}`
#[derive(Debug, Clone)]
pub struct LocalBackupDir {
    root: PathBuf,
}

impl LocalBackupDir {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, key: &str) -> Result<PathBuf, BackupError> {
        confsync_store::check_key(key).map_err(|_| BackupError::Missing(key.to_string()))?;
        Ok(key.split('/').fold(self.root.clone(), |p, seg| p.join(seg)))
    }
}

#[async_trait]
impl BackupSink for LocalBackupDir {
    async fn persist(&self, backup: &Backup) -> Result<(), BackupError> {
        let key = backup.key.key();
        let path = self.path_of(&key)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        fs::write(&path, &backup.bytes).await?;
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, BackupError> {
        let path = self.path_of(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BackupError::Missing(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, instance: &str) -> Result<Vec<String>, BackupError> {
        let mut keys = Vec::new();
        let mut pending = vec![(self.root.join(instance), instance.to_string())];
        while let Some((dir, rel)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                let key = format!("{rel}/{name}");
                if entry.file_type().await?.is_dir() {
                    pending.push((entry.path(), key));
                } else {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn remove(&self, key: &str) -> Result<(), BackupError> {
        let path = self.path_of(key)?;
        match fs::remove_file(&path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Backups in the store's `backups` bucket
#[derive(Debug, Clone)]
pub struct StoreBackupSink<S> {
    store: S,
}

impl<S: ObjectStore> StoreBackupSink<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: ObjectStore> BackupSink for StoreBackupSink<S> {
    async fn persist(&self, backup: &Backup) -> Result<(), BackupError> {
        self.store
            .put(layout::BACKUPS, &backup.key.key(), backup.bytes.clone())
            .await
            .map_err(|e| BackupError::Write {
                file: backup.file.clone(),
                message: e.to_string(),
            })
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, BackupError> {
        self.store.get(layout::BACKUPS, key).await.map_err(|e| {
            if e.is_not_found() {
                BackupError::Missing(key.to_string())
            } else {
                BackupError::Write {
                    file: key.to_string(),
                    message: e.to_string(),
                }
            }
        })
    }

    async fn list(&self, instance: &str) -> Result<Vec<String>, BackupError> {
        self.store
            .list(layout::BACKUPS, &layout::backup_prefix(instance))
            .await
            .map_err(|e| BackupError::Write {
                file: instance.to_string(),
                message: e.to_string(),
            })
    }

    async fn remove(&self, key: &str) -> Result<(), BackupError> {
        self.store
            .delete(layout::BACKUPS, key)
            .await
            .map_err(|e| BackupError::Write {
                file: key.to_string(),
                message: e.to_string(),
            })
    }
}

/// Local directory first, then the store bucket
///
/// A backup only counts as taken once both copies exist. Fetches prefer the
/// local copy and fall back to the bucket (inverse requests may restore a
/// backup whose local copy was pruned).
#[derive(Clone)]
pub struct TieredBackupSink {
    local: Arc<dyn BackupSink>,
    remote: Arc<dyn BackupSink>,
}

impl TieredBackupSink {
    #[must_use]
    pub fn new(local: Arc<dyn BackupSink>, remote: Arc<dyn BackupSink>) -> Self {
        Self { local, remote }
    }
}

#[async_trait]
impl BackupSink for TieredBackupSink {
    async fn persist(&self, backup: &Backup) -> Result<(), BackupError> {
        self.local.persist(backup).await?;
        self.remote.persist(backup).await
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, BackupError> {
        match self.local.fetch(key).await {
            Err(BackupError::Missing(_)) => self.remote.fetch(key).await,
            other => other,
        }
    }

    async fn list(&self, instance: &str) -> Result<Vec<String>, BackupError> {
        self.local.list(instance).await
    }

    async fn remove(&self, key: &str) -> Result<(), BackupError> {
        self.local.remove(key).await?;
        self.remote.remove(key).await
    }
}

/// How long backups are kept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Backups older than this are eligible for pruning
    pub max_age_days: u32,
    /// Newest backups per file that are never pruned
    pub min_keep: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age_days: 14,
            min_keep: 3,
        }
    }
}

impl RetentionPolicy {
    #[inline]
    #[must_use]
    pub fn max_age(&self) -> Duration {
        Duration::days(i64::from(self.max_age_days))
    }
}

/// Keys that may be deleted under `policy`
///
/// Backups are grouped per `(instance, plugin, filename)`. Within a group the
/// newest `min_keep` always survive; of the rest, those older than
/// `max_age` are selected. Keys that do not parse are never selected.
#[must_use]
pub fn select_prunable(keys: &[String], now: DateTime<Utc>, policy: &RetentionPolicy) -> Vec<String> {
    let mut series: HashMap<(String, String, String), Vec<(DateTime<Utc>, &String)>> =
        HashMap::new();
    for key in keys {
        if let Some(parsed) = BackupKey::parse(key) {
            let (instance, plugin, filename) = parsed.series();
            series
                .entry((instance.to_string(), plugin.to_string(), filename.to_string()))
                .or_default()
                .push((parsed.taken_at, key));
        }
    }

    let cutoff = now - policy.max_age();
    let mut prunable: Vec<String> = series
        .into_values()
        .flat_map(|mut backups| {
            backups.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(a.1)));
            backups
                .into_iter()
                .skip(policy.min_keep)
                .filter(|(taken_at, _)| *taken_at < cutoff)
                .map(|(_, key)| key.clone())
                .collect::<Vec<_>>()
        })
        .collect();
    prunable.sort();
    prunable
}

/// Prune one instance's backups in `sink`; returns how many were deleted
///
/// # Errors
/// Listing failed. Individual delete failures are logged and skipped.
pub async fn prune_backups(
    sink: &dyn BackupSink,
    instance: &str,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> Result<usize, BackupError> {
    let keys = sink.list(instance).await?;
    let prunable = select_prunable(&keys, now, policy);
    let mut removed = 0;
    for key in &prunable {
        match sink.remove(key).await {
            Ok(()) => {
                debug!(key = %key, "Pruned backup");
                removed += 1;
            }
            Err(e) => warn!(key = %key, error = %e, "Failed to prune backup"),
        }
    }
    if removed > 0 {
        info!(instance, removed, "Backups pruned");
    }
    Ok(removed)
}
