//! TOML codec

use crate::error::ParseError;
use crate::format::{FileFormat, FormatCodec};
use crate::tree::ConfigTree;

/// TOML codec
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlCodec;

impl FormatCodec for TomlCodec {
    fn format(&self) -> FileFormat {
        FileFormat::Toml
    }

    fn parse(&self, text: &str) -> Result<ConfigTree, ParseError> {
        let table: toml::Table = text.parse().map_err(|e: toml::de::Error| ParseError::Syntax {
            format: FileFormat::Toml,
            message: e.to_string(),
        })?;
        Ok(ConfigTree::from_toml(toml::Value::Table(table)))
    }

    fn render(&self, tree: &ConfigTree) -> Result<String, ParseError> {
        let toml::Value::Table(table) = tree.to_toml()? else {
            return Err(ParseError::Unrepresentable {
                format: FileFormat::Toml,
                what: format!("{} at document root", tree.kind_name()),
            });
        };
        toml::to_string(&table).map_err(|e| ParseError::Syntax {
            format: FileFormat::Toml,
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::KeyPath;

    #[test]
    fn parse_table() {
        let tree = TomlCodec.parse("[limits]\nplayers = 20\n").unwrap();
        let path: KeyPath = "limits.players".parse().unwrap();
        assert_eq!(tree.get(&path), Some(&ConfigTree::int(20)));
    }

    #[test]
    fn scalar_root_unrepresentable() {
        let err = TomlCodec.render(&ConfigTree::int(1)).unwrap_err();
        assert!(matches!(err, ParseError::Unrepresentable { .. }));
    }
}
