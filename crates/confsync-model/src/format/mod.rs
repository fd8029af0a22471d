//! Config file formats
//!
//! Provides conversion between file text and [`ConfigTree`]:
//! - YAML via serde_yaml
//! - JSON via serde_json
//! - TOML via toml
//! - Java-style `.properties` (flat `key=value`), hand-parsed
//!
//! Anything else is [`FileFormat::Text`]: line operations still work on it,
//! structured operations and post-apply verification do not apply.

use std::fmt::{self, Display, Formatter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::path::{KeyPath, PathError};
use crate::tree::ConfigTree;

mod json;
mod properties;
mod toml_codec;
mod yaml;

pub use json::JsonCodec;
pub use properties::PropertiesCodec;
pub use toml_codec::TomlCodec;
pub use yaml::YamlCodec;

/// Codec trait for converting file text to and from config trees
///
/// Implement this trait to add support for new file formats.
pub trait FormatCodec: Send + Sync + 'static {
    /// Format this codec handles
    fn format(&self) -> FileFormat;

    /// Parse file text into a tree
    fn parse(&self, text: &str) -> Result<ConfigTree, ParseError>;

    /// Serialize a tree back to file text
    fn render(&self, tree: &ConfigTree) -> Result<String, ParseError>;

    /// Interpret a raw key path for this format
    ///
    /// Nested formats split on dots; flat formats override this.
    fn key_path(&self, raw: &str) -> Result<KeyPath, PathError> {
        raw.parse()
    }
}

/// Supported file formats, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Yaml,
    Json,
    Toml,
    Properties,
    Text,
}

impl FileFormat {
    /// Detect format from a path's extension
    #[must_use]
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let ext = path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("yml" | "yaml") => Self::Yaml,
            Some("json") => Self::Json,
            Some("toml") => Self::Toml,
            Some("properties") => Self::Properties,
            _ => Self::Text,
        }
    }

    /// Whether the format parses into a tree
    #[inline]
    #[must_use]
    pub fn is_structured(self) -> bool {
        !matches!(self, Self::Text)
    }

    /// Codec for this format (`None` for plain text)
    #[must_use]
    pub fn codec(self) -> Option<&'static dyn FormatCodec> {
        match self {
            Self::Yaml => Some(&YamlCodec),
            Self::Json => Some(&JsonCodec),
            Self::Toml => Some(&TomlCodec),
            Self::Properties => Some(&PropertiesCodec),
            Self::Text => None,
        }
    }

    /// Parse text with this format's codec
    ///
    /// # Errors
    /// `ParseError::Unstructured` for plain text, otherwise the codec's error
    pub fn parse(self, text: &str) -> Result<ConfigTree, ParseError> {
        self.codec()
            .ok_or(ParseError::Unstructured(self))?
            .parse(text)
    }

    /// Render a tree with this format's codec
    ///
    /// # Errors
    /// `ParseError::Unstructured` for plain text, otherwise the codec's error
    pub fn render(self, tree: &ConfigTree) -> Result<String, ParseError> {
        self.codec()
            .ok_or(ParseError::Unstructured(self))?
            .render(tree)
    }

    /// Interpret a raw key path for this format
    ///
    /// # Errors
    /// Returns error if the path has empty segments
    pub fn key_path(self, raw: &str) -> Result<KeyPath, PathError> {
        match self.codec() {
            Some(codec) => codec.key_path(raw),
            None => raw.parse(),
        }
    }
}

impl Display for FileFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Yaml => "yaml",
            Self::Json => "json",
            Self::Toml => "toml",
            Self::Properties => "properties",
            Self::Text => "text",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_by_extension() {
        assert_eq!(FileFormat::from_path("plugins/Essentials/config.yml"), FileFormat::Yaml);
        assert_eq!(FileFormat::from_path("a.YAML"), FileFormat::Yaml);
        assert_eq!(FileFormat::from_path("ops.json"), FileFormat::Json);
        assert_eq!(FileFormat::from_path("Cargo.toml"), FileFormat::Toml);
        assert_eq!(FileFormat::from_path("server.properties"), FileFormat::Properties);
        assert_eq!(FileFormat::from_path("motd.txt"), FileFormat::Text);
        assert_eq!(FileFormat::from_path("noext"), FileFormat::Text);
    }

    #[test]
    fn text_is_unstructured() {
        assert!(!FileFormat::Text.is_structured());
        assert!(matches!(
            FileFormat::Text.parse("x"),
            Err(ParseError::Unstructured(FileFormat::Text))
        ));
    }

    #[test]
    fn properties_key_paths_are_flat() {
        let path = FileFormat::Properties.key_path("server.port").unwrap();
        assert_eq!(path.len(), 1);
        let path = FileFormat::Yaml.key_path("server.port").unwrap();
        assert_eq!(path.len(), 2);
    }
}
