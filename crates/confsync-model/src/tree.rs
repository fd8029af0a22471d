//! Config trees
//!
//! [`ConfigTree`] is the format-independent representation of one parsed
//! configuration file. Every supported format converts into it, and both
//! drift detection and `SetKey` operate on it. The shape of a tree is never
//! assumed to match any other tree: consumers match on the variant they
//! actually hold.

use std::fmt::{self, Display, Formatter};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;

use crate::error::{ParseError, TreeError};
use crate::format::FileFormat;
use crate::path::KeyPath;

/// Leaf value of a config tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Scalar {
    /// Numeric view used for tolerant comparison
    ///
    /// Strings count as numeric when their trimmed text parses as a number.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn numeric(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::String(s) => s.trim().parse::<f64>().ok(),
            Self::Null | Self::Bool(_) => None,
        }
    }

    /// Whether this is a native number (not a numeric-looking string)
    #[inline]
    #[must_use]
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    /// Tolerant equality: `"20"`, `20` and `20.0` are equal.
    ///
    /// Two strings still compare exactly; tolerance only applies when at
    /// least one side is a native number.
    #[must_use]
    pub fn loosely_eq(&self, other: &Self) -> bool {
        if self == other {
            return true;
        }
        if !(self.is_number() || other.is_number()) {
            return false;
        }
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => {
                let scale = a.abs().max(b.abs()).max(1.0);
                (a - b).abs() <= f64::EPSILON * scale
            }
            _ => false,
        }
    }

    /// Human-readable rendering used in diagnostics and line edits
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) if f.is_finite() && f.fract() == 0.0 => format!("{f:.1}"),
            Self::Float(f) => f.to_string(),
            Self::String(s) => s.clone(),
        }
    }
}

/// Recursive config value: scalar, list or string-keyed map
///
/// Maps keep insertion order so serialization does not reshuffle files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigTree {
    Scalar(Scalar),
    List(Vec<ConfigTree>),
    Map(IndexMap<String, ConfigTree>),
}

impl ConfigTree {
    /// Empty map (root of an empty document)
    #[inline]
    #[must_use]
    pub fn empty_map() -> Self {
        Self::Map(IndexMap::new())
    }

    /// String scalar
    #[inline]
    #[must_use]
    pub fn string(s: impl Into<String>) -> Self {
        Self::Scalar(Scalar::String(s.into()))
    }

    /// Integer scalar
    #[inline]
    #[must_use]
    pub fn int(i: i64) -> Self {
        Self::Scalar(Scalar::Int(i))
    }

    /// Variant name, used when reporting shape mismatches
    #[inline]
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Get the value at `path`
    ///
    /// Numeric segments index into lists.
    #[must_use]
    pub fn get(&self, path: &KeyPath) -> Option<&ConfigTree> {
        let mut current = self;
        for segment in path.iter() {
            current = match current {
                Self::Map(map) => map.get(segment)?,
                Self::List(items) => items.get(segment.parse::<usize>().ok()?)?,
                Self::Scalar(_) => return None,
            };
        }
        Some(current)
    }

    /// Set the value at `path`, creating intermediate maps as needed
    ///
    /// Returns the previous value, if any. A null root (empty document) is
    /// promoted to an empty map first. Descending through a scalar is an
    /// error rather than a silent overwrite.
    ///
    /// # Errors
    /// - `TreeError::EmptyPath` for the root path
    /// - `TreeError::NotAContainer` when an intermediate value is a scalar
    /// - `TreeError::BadIndex` when a list segment is not a valid index
    pub fn set(&mut self, path: &KeyPath, value: ConfigTree) -> Result<Option<ConfigTree>, TreeError> {
        let Some((last, parents)) = path.segments().split_last() else {
            return Err(TreeError::EmptyPath);
        };

        if matches!(self, Self::Scalar(Scalar::Null)) {
            *self = Self::empty_map();
        }

        let mut walked = KeyPath::root();
        let mut current = self;
        for segment in parents {
            walked = walked.child(segment.clone());
            current = match current {
                Self::Map(map) => map
                    .entry(segment.clone())
                    .or_insert_with(Self::empty_map),
                Self::List(items) => {
                    let index = list_index(segment, items.len(), &walked)?;
                    &mut items[index]
                }
                Self::Scalar(_) => {
                    return Err(TreeError::NotAContainer {
                        at: walked.to_string(),
                        kind: "scalar",
                    })
                }
            };
        }

        match current {
            Self::Map(map) => Ok(map.insert(last.clone(), value)),
            Self::List(items) => {
                let index = list_index(last, items.len(), path)?;
                Ok(Some(std::mem::replace(&mut items[index], value)))
            }
            Self::Scalar(_) => Err(TreeError::NotAContainer {
                at: walked.to_string(),
                kind: "scalar",
            }),
        }
    }

    /// Compact rendering: scalars as text, containers as JSON
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Scalar(s) => s.render(),
            other => other.to_json().to_string(),
        }
    }

    /// Convert from a JSON value
    #[must_use]
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Scalar(Scalar::Null),
            JsonValue::Bool(b) => Self::Scalar(Scalar::Bool(b)),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Scalar(Scalar::Int(i)),
                None => Self::Scalar(Scalar::Float(n.as_f64().unwrap_or(f64::NAN))),
            },
            JsonValue::String(s) => Self::Scalar(Scalar::String(s)),
            JsonValue::Array(items) => Self::List(items.into_iter().map(Self::from_json).collect()),
            JsonValue::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to a JSON value
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Scalar(Scalar::Null) => JsonValue::Null,
            Self::Scalar(Scalar::Bool(b)) => JsonValue::Bool(*b),
            Self::Scalar(Scalar::Int(i)) => JsonValue::from(*i),
            Self::Scalar(Scalar::Float(f)) => serde_json::Number::from_f64(*f)
                .map_or(JsonValue::Null, JsonValue::Number),
            Self::Scalar(Scalar::String(s)) => JsonValue::String(s.clone()),
            Self::List(items) => JsonValue::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => JsonValue::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Convert from a YAML value
    ///
    /// Non-string mapping keys are rendered to text; tags are dropped.
    #[must_use]
    pub fn from_yaml(value: YamlValue) -> Self {
        match value {
            YamlValue::Null => Self::Scalar(Scalar::Null),
            YamlValue::Bool(b) => Self::Scalar(Scalar::Bool(b)),
            YamlValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Scalar(Scalar::Int(i)),
                None => Self::Scalar(Scalar::Float(n.as_f64().unwrap_or(f64::NAN))),
            },
            YamlValue::String(s) => Self::Scalar(Scalar::String(s)),
            YamlValue::Sequence(items) => {
                Self::List(items.into_iter().map(Self::from_yaml).collect())
            }
            YamlValue::Mapping(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| (yaml_key(k), Self::from_yaml(v)))
                    .collect(),
            ),
            YamlValue::Tagged(tagged) => Self::from_yaml(tagged.value),
        }
    }

    /// Convert to a YAML value
    #[must_use]
    pub fn to_yaml(&self) -> YamlValue {
        match self {
            Self::Scalar(Scalar::Null) => YamlValue::Null,
            Self::Scalar(Scalar::Bool(b)) => YamlValue::Bool(*b),
            Self::Scalar(Scalar::Int(i)) => YamlValue::Number((*i).into()),
            Self::Scalar(Scalar::Float(f)) => YamlValue::Number((*f).into()),
            Self::Scalar(Scalar::String(s)) => YamlValue::String(s.clone()),
            Self::List(items) => YamlValue::Sequence(items.iter().map(Self::to_yaml).collect()),
            Self::Map(map) => {
                let mut mapping = serde_yaml::Mapping::new();
                for (k, v) in map {
                    mapping.insert(YamlValue::String(k.clone()), v.to_yaml());
                }
                YamlValue::Mapping(mapping)
            }
        }
    }

    /// Convert from a TOML value (datetimes become strings)
    #[must_use]
    pub fn from_toml(value: toml::Value) -> Self {
        match value {
            toml::Value::String(s) => Self::Scalar(Scalar::String(s)),
            toml::Value::Integer(i) => Self::Scalar(Scalar::Int(i)),
            toml::Value::Float(f) => Self::Scalar(Scalar::Float(f)),
            toml::Value::Boolean(b) => Self::Scalar(Scalar::Bool(b)),
            toml::Value::Datetime(d) => Self::Scalar(Scalar::String(d.to_string())),
            toml::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from_toml).collect())
            }
            toml::Value::Table(table) => Self::Map(
                table
                    .into_iter()
                    .map(|(k, v)| (k, Self::from_toml(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to a TOML value
    ///
    /// # Errors
    /// TOML has no null; any null in the tree is unrepresentable.
    pub fn to_toml(&self) -> Result<toml::Value, ParseError> {
        Ok(match self {
            Self::Scalar(Scalar::Null) => {
                return Err(ParseError::Unrepresentable {
                    format: FileFormat::Toml,
                    what: "null".to_string(),
                })
            }
            Self::Scalar(Scalar::Bool(b)) => toml::Value::Boolean(*b),
            Self::Scalar(Scalar::Int(i)) => toml::Value::Integer(*i),
            Self::Scalar(Scalar::Float(f)) => toml::Value::Float(*f),
            Self::Scalar(Scalar::String(s)) => toml::Value::String(s.clone()),
            Self::List(items) => toml::Value::Array(
                items
                    .iter()
                    .map(Self::to_toml)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Self::Map(map) => {
                let mut table = toml::map::Map::new();
                for (k, v) in map {
                    table.insert(k.clone(), v.to_toml()?);
                }
                toml::Value::Table(table)
            }
        })
    }
}

impl Display for ConfigTree {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<Scalar> for ConfigTree {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

fn list_index(segment: &str, len: usize, at: &KeyPath) -> Result<usize, TreeError> {
    segment
        .parse::<usize>()
        .ok()
        .filter(|i| *i < len)
        .ok_or_else(|| TreeError::BadIndex {
            at: at.to_string(),
            segment: segment.to_string(),
            len,
        })
}

fn yaml_key(key: YamlValue) -> String {
    match key {
        YamlValue::String(s) => s,
        YamlValue::Bool(b) => b.to_string(),
        YamlValue::Number(n) => n.to_string(),
        YamlValue::Null => "null".to_string(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn path(s: &str) -> KeyPath {
        s.parse().unwrap()
    }

    #[test]
    fn tolerant_numeric_compare() {
        assert!(Scalar::Int(20).loosely_eq(&Scalar::String("20".into())));
        assert!(Scalar::String(" 20 ".into()).loosely_eq(&Scalar::Int(20)));
        assert!(Scalar::Int(2).loosely_eq(&Scalar::Float(2.0)));
        assert!(!Scalar::Int(2).loosely_eq(&Scalar::String("two".into())));
        assert!(!Scalar::String("1".into()).loosely_eq(&Scalar::String("1.0".into())));
        assert!(!Scalar::Bool(true).loosely_eq(&Scalar::String("true".into())));
    }

    #[test]
    fn get_walks_maps_and_lists() {
        let tree = ConfigTree::from_json(json!({"worlds": [{"name": "lobby"}], "x": 1}));
        assert_eq!(tree.get(&path("worlds.0.name")), Some(&ConfigTree::string("lobby")));
        assert_eq!(tree.get(&path("x")), Some(&ConfigTree::int(1)));
        assert_eq!(tree.get(&path("x.y")), None);
        assert_eq!(tree.get(&path("worlds.3")), None);
    }

    #[test]
    fn set_creates_intermediate_maps() {
        let mut tree = ConfigTree::empty_map();
        let prev = tree.set(&path("a.b.c"), ConfigTree::int(3)).unwrap();
        assert_eq!(prev, None);
        assert_eq!(tree.to_json(), json!({"a": {"b": {"c": 3}}}));

        let prev = tree.set(&path("a.b.c"), ConfigTree::int(4)).unwrap();
        assert_eq!(prev, Some(ConfigTree::int(3)));
    }

    #[test]
    fn set_refuses_to_descend_through_scalar() {
        let mut tree = ConfigTree::from_json(json!({"a": 1}));
        let err = tree.set(&path("a.b"), ConfigTree::int(2)).unwrap_err();
        assert!(matches!(err, TreeError::NotAContainer { ref at, .. } if at == "a"));
        assert_eq!(tree.to_json(), json!({"a": 1}));
    }

    #[test]
    fn set_on_null_root_promotes_map() {
        let mut tree = ConfigTree::Scalar(Scalar::Null);
        tree.set(&path("motd"), ConfigTree::string("hi")).unwrap();
        assert_eq!(tree.to_json(), json!({"motd": "hi"}));
    }

    #[test]
    fn set_into_list_by_index() {
        let mut tree = ConfigTree::from_json(json!({"l": [1, 2]}));
        tree.set(&path("l.1"), ConfigTree::int(5)).unwrap();
        assert_eq!(tree.to_json(), json!({"l": [1, 5]}));
        assert!(matches!(
            tree.set(&path("l.9"), ConfigTree::int(0)),
            Err(TreeError::BadIndex { len: 2, .. })
        ));
    }

    #[test]
    fn yaml_conversion_keeps_order_and_stringifies_keys() {
        let yaml: YamlValue = serde_yaml::from_str("z: 1\na: 2\n3: three\n").unwrap();
        let tree = ConfigTree::from_yaml(yaml);
        let ConfigTree::Map(map) = &tree else {
            panic!("expected map");
        };
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "3"]);
    }

    #[test]
    fn toml_rejects_null() {
        let tree = ConfigTree::from_json(json!({"a": null}));
        assert!(tree.to_toml().is_err());
    }

    #[test]
    fn untagged_serde_roundtrip_shape() {
        let tree: ConfigTree = serde_json::from_value(json!({"a": [1, "b", null, 2.5]})).unwrap();
        assert_eq!(
            tree.get(&path("a.2")),
            Some(&ConfigTree::Scalar(Scalar::Null))
        );
        assert_eq!(serde_json::to_value(&tree).unwrap(), json!({"a": [1, "b", null, 2.5]}));
    }

    #[test]
    fn render_forms() {
        assert_eq!(ConfigTree::int(3).render(), "3");
        assert_eq!(ConfigTree::Scalar(Scalar::Float(3.0)).render(), "3.0");
        assert_eq!(ConfigTree::from_json(json!([1, 2])).render(), "[1,2]");
    }
}
