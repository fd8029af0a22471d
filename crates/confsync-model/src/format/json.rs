//! JSON codec

use serde_json::Value;

use crate::error::ParseError;
use crate::format::{FileFormat, FormatCodec};
use crate::tree::ConfigTree;

/// JSON codec (pretty output, trailing newline)
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl FormatCodec for JsonCodec {
    fn format(&self) -> FileFormat {
        FileFormat::Json
    }

    fn parse(&self, text: &str) -> Result<ConfigTree, ParseError> {
        let value: Value = serde_json::from_str(text).map_err(|e| ParseError::Syntax {
            format: FileFormat::Json,
            message: e.to_string(),
        })?;
        Ok(ConfigTree::from_json(value))
    }

    fn render(&self, tree: &ConfigTree) -> Result<String, ParseError> {
        let mut text =
            serde_json::to_string_pretty(&tree.to_json()).map_err(|e| ParseError::Syntax {
                format: FileFormat::Json,
                message: e.to_string(),
            })?;
        text.push('\n');
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_render() {
        let tree = JsonCodec.parse(r#"{"b": 1, "a": [true]}"#).unwrap();
        let text = JsonCodec.render(&tree).unwrap();
        assert!(text.ends_with('\n'));
        assert!(text.find("\"b\"").unwrap() < text.find("\"a\"").unwrap());
    }

    #[test]
    fn invalid_json() {
        assert!(JsonCodec.parse("{not json").is_err());
    }
}
