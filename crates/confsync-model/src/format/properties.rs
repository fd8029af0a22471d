//! Java-style `.properties` codec
//!
//! Flat `key=value` (or `key: value`) lines; `#` and `!` start comments;
//! a trailing backslash continues the value on the next line. Keys are
//! never split on dots.

use indexmap::IndexMap;

use crate::error::ParseError;
use crate::format::{FileFormat, FormatCodec};
use crate::path::{KeyPath, PathError};
use crate::tree::{ConfigTree, Scalar};

/// Properties codec
#[derive(Debug, Clone, Copy, Default)]
pub struct PropertiesCodec;

impl PropertiesCodec {
    /// Split one logical line into key and value, if it is an entry
    #[must_use]
    pub fn split_entry(line: &str) -> Option<(&str, &str)> {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
            return None;
        }
        let sep = trimmed.find(['=', ':']);
        Some(match sep {
            Some(i) => (trimmed[..i].trim_end(), trimmed[i + 1..].trim_start()),
            None => (trimmed.trim_end(), ""),
        })
    }
}

impl FormatCodec for PropertiesCodec {
    fn format(&self) -> FileFormat {
        FileFormat::Properties
    }

    fn parse(&self, text: &str) -> Result<ConfigTree, ParseError> {
        let mut map = IndexMap::new();
        let mut pending = String::new();

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim_end_matches('\r');
            if !pending.is_empty() {
                pending.push_str(line.trim_start());
            } else {
                pending.push_str(line);
            }
            if pending.ends_with('\\') {
                pending.pop();
                continue;
            }
            if let Some((key, value)) = Self::split_entry(&pending) {
                if key.is_empty() {
                    return Err(ParseError::Syntax {
                        format: FileFormat::Properties,
                        message: format!("line {}: empty key", lineno + 1),
                    });
                }
                map.insert(
                    key.to_string(),
                    ConfigTree::Scalar(Scalar::String(value.to_string())),
                );
            }
            pending.clear();
        }

        Ok(ConfigTree::Map(map))
    }

    fn render(&self, tree: &ConfigTree) -> Result<String, ParseError> {
        let ConfigTree::Map(map) = tree else {
            return Err(ParseError::Unrepresentable {
                format: FileFormat::Properties,
                what: format!("{} at document root", tree.kind_name()),
            });
        };
        let mut out = String::new();
        for (key, value) in map {
            let ConfigTree::Scalar(scalar) = value else {
                return Err(ParseError::Unrepresentable {
                    format: FileFormat::Properties,
                    what: format!("nested {} under '{key}'", value.kind_name()),
                });
            };
            out.push_str(key);
            out.push('=');
            out.push_str(&scalar.render());
            out.push('\n');
        }
        Ok(out)
    }

    fn key_path(&self, raw: &str) -> Result<KeyPath, PathError> {
        if raw.is_empty() {
            return Err(PathError::EmptySegment(raw.to_string()));
        }
        Ok(KeyPath::flat(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_entries_and_skips_comments() {
        let text = "# Minecraft server properties\nserver-port=25565\nmotd: A Server\n! bang comment\nlevel-name = world\n";
        let tree = PropertiesCodec.parse(text).unwrap();
        assert_eq!(
            tree.get(&KeyPath::flat("server-port")),
            Some(&ConfigTree::string("25565"))
        );
        assert_eq!(tree.get(&KeyPath::flat("motd")), Some(&ConfigTree::string("A Server")));
        assert_eq!(tree.get(&KeyPath::flat("level-name")), Some(&ConfigTree::string("world")));
    }

    #[test]
    fn continuation_lines_join() {
        let tree = PropertiesCodec.parse("long=one \\\n    two\n").unwrap();
        assert_eq!(tree.get(&KeyPath::flat("long")), Some(&ConfigTree::string("one two")));
    }

    #[test]
    fn dotted_keys_stay_flat() {
        let tree = PropertiesCodec.parse("query.port=25565\n").unwrap();
        assert!(tree.get(&KeyPath::flat("query.port")).is_some());
    }

    #[test]
    fn render_rejects_nesting() {
        let tree = ConfigTree::from_json(serde_json::json!({"a": {"b": 1}}));
        assert!(PropertiesCodec.render(&tree).is_err());
    }
}
