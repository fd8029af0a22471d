//! Drift reports

use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::path::KeyPath;
use crate::tree::ConfigTree;

/// Kind of divergence between baseline and current config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    /// Key in baseline, absent on disk
    Missing,
    /// Key on disk, absent in baseline
    Unexpected,
    /// Lists differ in length or elements
    ListChanged,
    /// Scalars differ, or the shapes differ
    ValueMismatch,
}

impl DriftKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Unexpected => "unexpected",
            Self::ListChanged => "list_changed",
            Self::ValueMismatch => "value_mismatch",
        }
    }
}

impl Display for DriftKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One divergence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftItem {
    pub plugin: String,
    pub file: String,
    #[serde(with = "key_path_string")]
    pub key_path: KeyPath,
    pub baseline_value: Option<ConfigTree>,
    pub current_value: Option<ConfigTree>,
    pub kind: DriftKind,
    pub severity_score: f64,
    #[serde(default)]
    pub reason: String,
}

/// All divergences of one instance at one scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub instance: String,
    pub scan_time: DateTime<Utc>,
    pub items: Vec<DriftItem>,
}

impl DriftReport {
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.items.is_empty()
    }
}

mod key_path_string {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::path::KeyPath;

    pub(super) fn serialize<S: Serializer>(path: &KeyPath, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(path)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<KeyPath, D::Error> {
        let text = String::deserialize(d)?;
        Ok(if text.is_empty() {
            KeyPath::root()
        } else {
            KeyPath::new(text.split('.').map(str::to_string).collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_wire_shape() {
        let item = DriftItem {
            plugin: "Essentials".into(),
            file: "config.yml".into(),
            key_path: "chat.radius".parse().unwrap(),
            baseline_value: Some(ConfigTree::int(1)),
            current_value: Some(ConfigTree::int(2)),
            kind: DriftKind::ValueMismatch,
            severity_score: 1.0,
            reason: "1 != 2".into(),
        };
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["key_path"], "chat.radius");
        assert_eq!(value["kind"], "value_mismatch");
        assert_eq!(value["baseline_value"], 1);
        let back: DriftItem = serde_json::from_value(value).unwrap();
        assert_eq!(back, item);
    }
}
