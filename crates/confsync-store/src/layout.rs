//! Bucket names and key layout
//!
//! ```text
//! changes/        pending/{server}/{id}.json
//!                 in-progress/{id}.marker
//!                 completed/{id}.json
//! drift-reports/  {instance}/{timestamp}.json
//! backups/        {instance}/{plugin}/{timestamp}_{filename}
//! deployments/    {id}.json
//! ```
//!
//! `{filename}` is the file's path below its plugin directory with `/`
//! replaced by `__`, so two files with the same name in different
//! subdirectories never collide.

use chrono::{DateTime, Utc};
use confsync_model::time::{parse_stamp, stamp};
use confsync_model::{plugin_of, RequestId};
use serde::{Deserialize, Serialize};

pub const CHANGES: &str = "changes";
pub const DRIFT_REPORTS: &str = "drift-reports";
pub const BACKUPS: &str = "backups";
pub const DEPLOYMENTS: &str = "deployments";

const PENDING: &str = "pending/";
const IN_PROGRESS: &str = "in-progress/";
const COMPLETED: &str = "completed/";
const MARKER_EXT: &str = ".marker";
const JSON_EXT: &str = ".json";

#[must_use]
pub fn pending_prefix(server: &str) -> String {
    format!("{PENDING}{server}/")
}

#[must_use]
pub fn pending_key(server: &str, id: &RequestId) -> String {
    format!("{PENDING}{server}/{id}{JSON_EXT}")
}

#[must_use]
pub fn claim_key(id: &RequestId) -> String {
    format!("{IN_PROGRESS}{id}{MARKER_EXT}")
}

#[must_use]
pub fn result_key(id: &RequestId) -> String {
    format!("{COMPLETED}{id}{JSON_EXT}")
}

#[must_use]
pub fn drift_report_key(instance: &str, at: DateTime<Utc>) -> String {
    format!("{instance}/{}{JSON_EXT}", stamp(at))
}

#[must_use]
pub fn deployment_key(id: &str) -> String {
    format!("{id}{JSON_EXT}")
}

/// Request id from a `pending/{server}/{id}.json` key
#[must_use]
pub fn request_id_from_pending(key: &str) -> Option<RequestId> {
    let rest = key.strip_prefix(PENDING)?;
    let (_server, file) = rest.split_once('/')?;
    let id = RequestId::from_raw(file.strip_suffix(JSON_EXT)?);
    id.is_valid().then_some(id)
}

/// Advisory claim written to `in-progress/{id}.marker`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimMarker {
    /// Identity of the claiming agent
    pub agent: String,
    pub claimed_at: DateTime<Utc>,
}

impl ClaimMarker {
    #[must_use]
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            claimed_at: Utc::now(),
        }
    }
}

/// Parsed backup key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupKey {
    pub instance: String,
    pub plugin: String,
    pub taken_at: DateTime<Utc>,
    /// Encoded file name (`/` as `__`)
    pub filename: String,
}

impl BackupKey {
    /// Backup key for `file` (relative to the instance directory)
    #[must_use]
    pub fn for_file(instance: &str, file: &str, taken_at: DateTime<Utc>) -> Self {
        let plugin = plugin_of(file).to_string();
        let below = if plugin == "server" {
            file.trim_start_matches("./")
        } else {
            file.trim_start_matches("./")
                .strip_prefix("plugins/")
                .and_then(|rest| rest.strip_prefix(plugin.as_str()))
                .map_or(file, |rest| rest.trim_start_matches('/'))
        };
        Self {
            instance: instance.to_string(),
            plugin,
            taken_at,
            filename: below.replace('/', "__"),
        }
    }

    /// Key in the `backups` bucket
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "{}/{}/{}_{}",
            self.instance,
            self.plugin,
            stamp(self.taken_at),
            self.filename
        )
    }

    /// Grouping used by retention: one series per `(instance, plugin, filename)`
    #[must_use]
    pub fn series(&self) -> (&str, &str, &str) {
        (&self.instance, &self.plugin, &self.filename)
    }

    /// Parse `{instance}/{plugin}/{timestamp}_{filename}`
    #[must_use]
    pub fn parse(key: &str) -> Option<Self> {
        let mut parts = key.splitn(3, '/');
        let instance = parts.next()?;
        let plugin = parts.next()?;
        let rest = parts.next()?;
        let (ts, filename) = rest.split_once('_')?;
        if instance.is_empty() || plugin.is_empty() || filename.is_empty() {
            return None;
        }
        Some(Self {
            instance: instance.to_string(),
            plugin: plugin.to_string(),
            taken_at: parse_stamp(ts)?,
            filename: filename.to_string(),
        })
    }
}

#[must_use]
pub fn backup_prefix(instance: &str) -> String {
    format!("{instance}/")
}
