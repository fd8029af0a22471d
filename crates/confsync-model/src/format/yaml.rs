//! YAML codec
//!
//! Uses serde_yaml. Mapping order survives a parse/render cycle; comments
//! do not (the updater edits YAML scalars in place to keep them).

use serde_yaml::Value;

use crate::error::ParseError;
use crate::format::{FileFormat, FormatCodec};
use crate::tree::{ConfigTree, Scalar};

/// YAML codec
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlCodec;

impl FormatCodec for YamlCodec {
    fn format(&self) -> FileFormat {
        FileFormat::Yaml
    }

    fn parse(&self, text: &str) -> Result<ConfigTree, ParseError> {
        let value: Value = serde_yaml::from_str(text).map_err(|e| ParseError::Syntax {
            format: FileFormat::Yaml,
            message: e.to_string(),
        })?;

        // A file holding only comments is an empty document, not a null config
        Ok(match ConfigTree::from_yaml(value) {
            ConfigTree::Scalar(Scalar::Null) => ConfigTree::empty_map(),
            tree => tree,
        })
    }

    fn render(&self, tree: &ConfigTree) -> Result<String, ParseError> {
        serde_yaml::to_string(&tree.to_yaml()).map_err(|e| ParseError::Syntax {
            format: FileFormat::Yaml,
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::KeyPath;

    #[test]
    fn parses_nested_document() {
        let tree = YamlCodec
            .parse("server:\n  host: localhost\n  port: 8080\ndebug: true\n")
            .unwrap();
        let port: KeyPath = "server.port".parse().unwrap();
        assert_eq!(tree.get(&port), Some(&ConfigTree::int(8080)));
    }

    #[test]
    fn comment_only_file_is_empty_map() {
        let tree = YamlCodec.parse("# nothing here\n").unwrap();
        assert_eq!(tree, ConfigTree::empty_map());
    }

    #[test]
    fn syntax_error_reported() {
        let err = YamlCodec.parse("a: [1, 2\n").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { format: FileFormat::Yaml, .. }));
    }

    #[test]
    fn render_keeps_key_order() {
        let tree = YamlCodec.parse("zeta: 1\nalpha: 2\n").unwrap();
        let text = YamlCodec.render(&tree).unwrap();
        assert!(text.find("zeta").unwrap() < text.find("alpha").unwrap());
    }
}
