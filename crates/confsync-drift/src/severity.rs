//! Severity scoring
//!
//! `score = kind_factor × weight(plugin, key) × criticality(instance) × recency_decay`

use std::collections::HashMap;
use std::time::Duration;

use confsync_model::{DriftKind, KeyPath};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::DriftError;

/// Base factor per divergence kind
#[must_use]
pub fn kind_factor(kind: DriftKind) -> f64 {
    match kind {
        DriftKind::Missing => 1.5,
        DriftKind::ValueMismatch | DriftKind::ListChanged => 1.0,
        DriftKind::Unexpected => 0.25,
    }
}

/// Drift scoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Weight of keys no pattern matches
    pub default_weight: f64,
    /// Key pattern → weight, for every plugin
    pub weights: IndexMap<String, f64>,
    /// Plugin → (key pattern → weight); consulted before `weights`
    pub plugin_weights: IndexMap<String, IndexMap<String, f64>>,
    /// Instance → multiplier; unlisted instances count 1.0
    pub instance_criticality: HashMap<String, f64>,
    /// Time for the recency damping to recover half way
    pub half_life_secs: u64,
    /// Recency factor of a divergence flagged just now
    pub decay_floor: f64,
    /// How long a parsed baseline is reused
    pub baseline_cache_ttl_secs: u64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            default_weight: 1.0,
            weights: IndexMap::new(),
            plugin_weights: IndexMap::new(),
            instance_criticality: HashMap::new(),
            half_life_secs: 24 * 60 * 60,
            decay_floor: 0.5,
            baseline_cache_ttl_secs: 300,
        }
    }
}

impl DriftConfig {
    /// # Errors
    /// `DriftError::InvalidConfig` for negative weights, a zero half-life
    /// or a floor outside `0..=1`
    pub fn validate(&self) -> Result<(), DriftError> {
        let invalid = |msg: String| Err(DriftError::InvalidConfig(msg));
        if negative(self.default_weight) {
            return invalid(format!("default_weight must be >= 0, got {}", self.default_weight));
        }
        let weights = self
            .weights
            .iter()
            .chain(self.plugin_weights.values().flatten())
            .chain(self.instance_criticality.iter());
        for (key, w) in weights {
            if negative(*w) {
                return invalid(format!("weight for '{key}' must be >= 0, got {w}"));
            }
        }
        if self.half_life_secs == 0 {
            return invalid("half_life_secs must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.decay_floor) {
            return invalid(format!("decay_floor must be within 0..=1, got {}", self.decay_floor));
        }
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn baseline_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.baseline_cache_ttl_secs)
    }
}

fn negative(w: f64) -> bool {
    w.is_nan() || w < 0.0
}

/// Key weights with per-plugin overrides
///
/// Patterns are tried most specific first: the full dotted path, then
/// `prefix*` / `*suffix` globs (longest wins), then the last path segment.
#[derive(Debug, Clone)]
pub struct WeightTable {
    default_weight: f64,
    global: IndexMap<String, f64>,
    plugins: IndexMap<String, IndexMap<String, f64>>,
}

impl Default for WeightTable {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl WeightTable {
    #[must_use]
    pub fn new(default_weight: f64) -> Self {
        Self {
            default_weight,
            global: IndexMap::new(),
            plugins: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn with_weight(mut self, pattern: impl Into<String>, weight: f64) -> Self {
        self.global.insert(pattern.into(), weight);
        self
    }

    #[must_use]
    pub fn with_plugin_weight(mut self, plugin: impl Into<String>, pattern: impl Into<String>, weight: f64) -> Self {
        self.plugins
            .entry(plugin.into())
            .or_default()
            .insert(pattern.into(), weight);
        self
    }

    #[must_use]
    pub fn weight(&self, plugin: &str, key: &KeyPath) -> f64 {
        let dotted = key.to_string();
        self.plugins
            .get(plugin)
            .and_then(|table| lookup(table, &dotted, key.last()))
            .or_else(|| lookup(&self.global, &dotted, key.last()))
            .unwrap_or(self.default_weight)
    }
}

fn lookup(table: &IndexMap<String, f64>, dotted: &str, last: Option<&str>) -> Option<f64> {
    if let Some(w) = table.get(dotted) {
        return Some(*w);
    }
    let glob = table
        .iter()
        .filter(|(pattern, _)| glob_matches(pattern, dotted))
        .max_by_key(|(pattern, _)| pattern.len())
        .map(|(_, w)| *w);
    if glob.is_some() {
        return glob;
    }
    last.and_then(|segment| table.get(segment).copied())
}

fn glob_matches(pattern: &str, dotted: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix('*') {
        dotted.starts_with(prefix)
    } else if let Some(suffix) = pattern.strip_prefix('*') {
        dotted.ends_with(suffix)
    } else {
        false
    }
}

/// Damping for divergences that were reported recently
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecencyDecay {
    pub half_life: Duration,
    pub floor: f64,
}

impl Default for RecencyDecay {
    fn default() -> Self {
        Self {
            half_life: Duration::from_secs(24 * 60 * 60),
            floor: 0.5,
        }
    }
}

impl RecencyDecay {
    /// `1.0` when never flagged; `floor` when flagged just now, rising back
    /// towards `1.0` with the configured half-life
    #[must_use]
    pub fn factor(&self, since_last_flag: Option<Duration>) -> f64 {
        let Some(elapsed) = since_last_flag else {
            return 1.0;
        };
        let half_lives = elapsed.as_secs_f64() / self.half_life.as_secs_f64().max(f64::MIN_POSITIVE);
        1.0 - (1.0 - self.floor) * 0.5_f64.powf(half_lives)
    }
}

/// Everything needed to score one divergence
#[derive(Debug, Clone, Default)]
pub struct SeverityModel {
    pub weights: WeightTable,
    pub criticality: HashMap<String, f64>,
    pub decay: RecencyDecay,
}

impl SeverityModel {
    #[must_use]
    pub fn from_config(config: &DriftConfig) -> Self {
        Self {
            weights: WeightTable {
                default_weight: config.default_weight,
                global: config.weights.clone(),
                plugins: config.plugin_weights.clone(),
            },
            criticality: config.instance_criticality.clone(),
            decay: RecencyDecay {
                half_life: Duration::from_secs(config.half_life_secs),
                floor: config.decay_floor,
            },
        }
    }

    #[must_use]
    pub fn instance_criticality(&self, instance: &str) -> f64 {
        self.criticality.get(instance).copied().unwrap_or(1.0)
    }

    #[must_use]
    pub fn score(
        &self,
        kind: DriftKind,
        plugin: &str,
        key: &KeyPath,
        instance: &str,
        since_last_flag: Option<Duration>,
    ) -> f64 {
        kind_factor(kind)
            * self.weights.weight(plugin, key)
            * self.instance_criticality(instance)
            * self.decay.factor(since_last_flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> KeyPath {
        s.parse().unwrap()
    }

    #[test]
    fn pattern_precedence() {
        let table = WeightTable::new(1.0)
            .with_weight("settings.motd", 5.0)
            .with_weight("settings.*", 2.0)
            .with_weight("*.password", 9.0)
            .with_weight("port", 3.0)
            .with_plugin_weight("Essentials", "port", 0.5);

        assert_eq!(table.weight("Shop", &path("settings.motd")), 5.0);
        assert_eq!(table.weight("Shop", &path("settings.chat")), 2.0);
        assert_eq!(table.weight("Shop", &path("db.password")), 9.0);
        assert_eq!(table.weight("Shop", &path("query.port")), 3.0);
        assert_eq!(table.weight("Essentials", &path("query.port")), 0.5);
        assert_eq!(table.weight("Shop", &path("other")), 1.0);
    }

    #[test]
    fn longest_glob_wins() {
        let table = WeightTable::new(1.0)
            .with_weight("a.*", 2.0)
            .with_weight("a.b.*", 4.0);
        assert_eq!(table.weight("p", &path("a.b.c")), 4.0);
        assert_eq!(table.weight("p", &path("a.x")), 2.0);
    }

    #[test]
    fn decay_curve() {
        let decay = RecencyDecay::default();
        assert_eq!(decay.factor(None), 1.0);
        assert!((decay.factor(Some(Duration::ZERO)) - 0.5).abs() < 1e-9);
        assert!((decay.factor(Some(decay.half_life)) - 0.75).abs() < 1e-9);
        assert!(decay.factor(Some(decay.half_life * 20)) > 0.999);
    }

    #[test]
    fn score_multiplies_factors() {
        let mut model = SeverityModel::default();
        model.weights = WeightTable::new(2.0);
        model.criticality.insert("survival".into(), 3.0);
        let s = model.score(DriftKind::Missing, "p", &path("x"), "survival", None);
        assert!((s - 1.5 * 2.0 * 3.0).abs() < 1e-9);
        let lobby = model.score(DriftKind::Unexpected, "p", &path("x"), "lobby", None);
        assert!((lobby - 0.5).abs() < 1e-9);
    }

    #[test]
    fn config_validation() {
        assert!(DriftConfig::default().validate().is_ok());
        let bad = DriftConfig {
            decay_floor: 1.5,
            ..DriftConfig::default()
        };
        assert!(bad.validate().is_err());
        let mut negative = DriftConfig::default();
        negative.weights.insert("x".into(), -1.0);
        assert!(negative.validate().is_err());
    }
}
