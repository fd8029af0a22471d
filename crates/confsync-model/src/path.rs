//! Key paths for addressing within config trees
//!
//! Provides [`KeyPath`], the dot-separated address of a value inside a
//! parsed configuration file (`database.pool.size`).

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Path within a config tree
///
/// # Examples
/// - `["settings", "motd"]` → `settings.motd`
/// - `["worlds", "0", "name"]` → `worlds.0.name` (numeric segments index lists)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    /// Create new path from segments
    #[inline]
    #[must_use]
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    /// Path made of one segment, kept verbatim even if it contains dots
    ///
    /// Flat formats (`.properties`) address keys such as `server.port` as a
    /// single segment.
    #[inline]
    #[must_use]
    pub fn flat(key: impl Into<String>) -> Self {
        Self(vec![key.into()])
    }

    /// Empty path (root)
    #[inline]
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Get path segments
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Get number of segments
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if path is empty (root)
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get parent path (if not root)
    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Get last segment (if not root)
    #[inline]
    #[must_use]
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Append a segment, returning new path
    #[inline]
    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut new = self.clone();
        new.0.push(segment.into());
        new
    }

    /// Iterate over segments
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl Display for KeyPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl FromStr for KeyPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::root());
        }
        let segments: Vec<String> = s.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(PathError::EmptySegment(s.to_string()));
        }
        Ok(Self(segments))
    }
}

impl From<Vec<String>> for KeyPath {
    fn from(segments: Vec<String>) -> Self {
        Self(segments)
    }
}

/// Key path errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Path contains an empty segment (`a..b`, trailing dot)
    #[error("empty segment in key path '{0}'")]
    EmptySegment(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_roundtrip() {
        let path: KeyPath = "settings.chat.format".parse().unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path.to_string(), "settings.chat.format");
    }

    #[test]
    fn empty_string_is_root() {
        let path: KeyPath = "".parse().unwrap();
        assert!(path.is_empty());
        assert_eq!(path.parent(), None);
    }

    #[test]
    fn empty_segment_rejected() {
        assert!(matches!(
            "a..b".parse::<KeyPath>(),
            Err(PathError::EmptySegment(_))
        ));
        assert!("a.".parse::<KeyPath>().is_err());
    }

    #[test]
    fn flat_keeps_dots() {
        let path = KeyPath::flat("server.port");
        assert_eq!(path.len(), 1);
        assert_eq!(path.last(), Some("server.port"));
    }

    #[test]
    fn child_and_parent() {
        let base: KeyPath = "a.b".parse().unwrap();
        let child = base.child("c");
        assert_eq!(child.to_string(), "a.b.c");
        assert_eq!(child.parent(), Some(base));
    }
}
