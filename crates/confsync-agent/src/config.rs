//! Agent configuration
//!
//! Loaded once from a TOML file at startup and shared as `Arc<AgentConfig>`.
//! Every field has a default, so a minimal file only names the server:
//!
//! ```toml
//! server_id = "node-1"
//!
//! [store]
//! kind = "fs"
//! root = "/mnt/confsync"
//!
//! [panel]
//! base_url = "https://panel.example.net"
//! token = "..."
//! restart_after_change = true
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use confsync_apply::RetentionPolicy;
use confsync_drift::DriftConfig;
use confsync_pipeline::PipelineConfig;
use confsync_store::{FsStore, MemoryStore, ObjectStore, RetryPolicy, RetryingStore};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which object store backend to use
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process-local store (single-process setups and tests)
    #[default]
    Memory,
    /// Directory, usually a shared mount
    Fs { root: PathBuf },
}

impl StoreConfig {
    /// Build the backend wrapped in timeout and retry handling
    #[must_use]
    pub fn build(&self, retry: &RetryPolicy) -> Arc<dyn ObjectStore> {
        match self {
            Self::Memory => Arc::new(RetryingStore::new(MemoryStore::new(), retry.clone())),
            Self::Fs { root } => Arc::new(RetryingStore::new(FsStore::new(root), retry.clone())),
        }
    }
}

/// Vendor panel access
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
    /// Restart the instance after every completed request
    pub restart_after_change: bool,
}

impl PanelConfig {
    /// Whether completed requests should trigger a restart
    #[inline]
    #[must_use]
    pub fn restarts(&self) -> bool {
        self.restart_after_change && self.base_url.is_some()
    }
}

/// Everything a node agent needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Name of this node in `pending/{server}/`
    pub server_id: String,
    /// Identity written into claim markers and results; defaults to
    /// `agent-{server_id}`
    pub agent_identity: Option<String>,
    pub instances_root: PathBuf,
    pub baseline_root: PathBuf,
    pub backup_root: PathBuf,
    /// Result journal and other local state
    pub state_dir: PathBuf,
    pub poll_interval_secs: u64,
    pub drift_interval_secs: u64,
    /// Requests older than this are failed without being applied
    pub request_deadline_secs: u64,
    /// Instances scanned in parallel
    pub drift_concurrency: usize,
    /// Free space that must remain after backups are written
    pub min_free_bytes: u64,
    pub store: StoreConfig,
    pub retry: RetryPolicy,
    pub retention: RetentionPolicy,
    pub drift: DriftConfig,
    pub panel: PanelConfig,
    pub pipeline: PipelineConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_id: "local".to_string(),
            agent_identity: None,
            instances_root: PathBuf::from("instances"),
            baseline_root: PathBuf::from("baselines"),
            backup_root: PathBuf::from("backups"),
            state_dir: PathBuf::from("state"),
            poll_interval_secs: 30,
            drift_interval_secs: 15 * 60,
            request_deadline_secs: 24 * 60 * 60,
            drift_concurrency: 4,
            min_free_bytes: 64 * 1024 * 1024,
            store: StoreConfig::default(),
            retry: RetryPolicy::default(),
            retention: RetentionPolicy::default(),
            drift: DriftConfig::default(),
            panel: PanelConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Create config with defaults for `server_id`
    #[must_use]
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            ..Self::default()
        }
    }

    /// Point every local directory below `root`
    #[must_use]
    pub fn with_node_root(mut self, root: &Path) -> Self {
        self.instances_root = root.join("instances");
        self.baseline_root = root.join("baselines");
        self.backup_root = root.join("backups");
        self.state_dir = root.join("state");
        self
    }

    #[inline]
    #[must_use]
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.agent_identity = Some(identity.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_drift_interval(mut self, secs: u64) -> Self {
        self.drift_interval_secs = secs;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_request_deadline(mut self, secs: u64) -> Self {
        self.request_deadline_secs = secs;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_min_free_bytes(mut self, bytes: u64) -> Self {
        self.min_free_bytes = bytes;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_panel(mut self, panel: PanelConfig) -> Self {
        self.panel = panel;
        self
    }

    /// Read and validate a TOML config file
    ///
    /// # Errors
    /// Unreadable file, invalid TOML or out-of-range values
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// `ConfigError::Invalid` naming the first bad value
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.server_id.trim().is_empty() || self.server_id.contains('/') {
            return invalid("server_id must be non-empty and contain no '/'");
        }
        if self.agent_identity.as_deref().is_some_and(|id| id.trim().is_empty()) {
            return invalid("agent_identity must not be blank");
        }
        if self.poll_interval_secs == 0 || self.drift_interval_secs == 0 {
            return invalid("poll and drift intervals must be positive");
        }
        if self.request_deadline_secs == 0 {
            return invalid("request_deadline_secs must be positive");
        }
        if self.drift_concurrency == 0 {
            return invalid("drift_concurrency must be at least 1");
        }
        if self.retry.max_attempts == 0 || self.retry.timeout_ms == 0 {
            return invalid("retry needs at least one attempt and a positive timeout");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return invalid("retry.base_delay_ms exceeds retry.max_delay_ms");
        }
        if self.panel.restart_after_change && self.panel.base_url.is_none() {
            return invalid("panel.restart_after_change requires panel.base_url");
        }
        if self.pipeline.stage_deadline_secs == 0 {
            return invalid("pipeline.stage_deadline_secs must be positive");
        }
        self.drift
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Identity used in claim markers and results
    #[must_use]
    pub fn identity(&self) -> String {
        self.agent_identity
            .clone()
            .unwrap_or_else(|| format!("agent-{}", self.server_id))
    }

    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    #[inline]
    #[must_use]
    pub fn drift_interval(&self) -> Duration {
        Duration::from_secs(self.drift_interval_secs)
    }

    #[inline]
    #[must_use]
    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.request_deadline_secs)
    }

    /// Directory of one instance
    #[must_use]
    pub fn instance_dir(&self, instance: &str) -> PathBuf {
        self.instances_root.join(instance)
    }
}
