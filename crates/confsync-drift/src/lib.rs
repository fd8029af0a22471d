//! confsync drift detection
//!
//! Compares the config files of a server instance with the plugin
//! baseline and produces a scored, ordered [`DriftReport`](confsync_model::DriftReport).
//!
//! # Core Concepts
//!
//! - [`diff_trees`]: pure recursive comparison; shape changes are reported,
//!   never descended into
//! - [`SeverityModel`]: kind factor × key weight × instance criticality ×
//!   recency decay
//! - [`DriftDetector`]: scans an instance directory and remembers since
//!   when each divergence has been flagged
//! - [`BaselineLoader`] / [`BaselineCache`]: parse the baseline tree once
//!   per TTL
//!
//! # Example
//!
//! ```rust,ignore
//! use confsync_drift::{BaselineCache, BaselineLoader, DriftConfig, DriftDetector, SeverityModel};
//!
//! let config = DriftConfig::default();
//! let cache = BaselineCache::new(config.baseline_cache_ttl());
//! let baseline = cache.get_or_load(&BaselineLoader::new("/srv/baseline")).await?;
//! let detector = DriftDetector::new(SeverityModel::from_config(&config));
//! let report = detector.scan("lobby", Path::new("/srv/instances/lobby"), &baseline, Utc::now()).await;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod baseline;
mod compare;
mod detector;
mod error;
mod severity;

pub use baseline::{Baseline, BaselineCache, BaselineFile, BaselineLoader};
pub use compare::{diff_trees, equivalent, Divergence};
pub use detector::{sort_items, DriftDetector};
pub use error::DriftError;
pub use severity::{kind_factor, DriftConfig, RecencyDecay, SeverityModel, WeightTable};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
