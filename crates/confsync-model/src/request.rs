//! Change requests
//!
//! A [`ChangeRequest`] is the unit of work the control plane hands to one
//! agent. It is immutable once written to the store.

use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::tree::ConfigTree;

/// Change request identifier
///
/// Ids become store keys, so only `[A-Za-z0-9_.-]` is accepted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh, time-ordered id
    #[must_use]
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// Wrap an existing id without validation
    #[inline]
    #[must_use]
    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is safe to embed in a store key
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self.0 != "."
            && self.0 != ".."
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    }

    /// Derived id, e.g. `{id}-rb` for a rollback request
    #[must_use]
    pub fn derive(&self, suffix: &str) -> Self {
        Self(format!("{}-{suffix}", self.0))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// What an operation does to its file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum OperationKind {
    /// Set a nested key in a structured file
    SetKey { path: String, value: ConfigTree },

    /// Replace the single line matching `pattern`
    ReplaceLine { pattern: String, replacement: String },

    /// Insert `content` after the first line matching `anchor`, or append
    AddLine {
        content: String,
        #[serde(default)]
        anchor: String,
    },

    /// Remove every line matching `pattern`
    DeleteLine { pattern: String },

    /// Write back the exact bytes of a stored backup
    RestoreFile { backup_key: String },
}

impl OperationKind {
    /// Name as it appears in the `kind` field
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::SetKey { .. } => "SetKey",
            Self::ReplaceLine { .. } => "ReplaceLine",
            Self::AddLine { .. } => "AddLine",
            Self::DeleteLine { .. } => "DeleteLine",
            Self::RestoreFile { .. } => "RestoreFile",
        }
    }
}

/// One file mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeOperation {
    /// File path relative to the instance directory
    pub file: String,

    #[serde(flatten)]
    pub kind: OperationKind,

    /// Optimistic concurrency guard
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_prior_value: Option<ConfigTree>,
}

impl ChangeOperation {
    #[must_use]
    pub fn set_key(file: impl Into<String>, path: impl Into<String>, value: ConfigTree) -> Self {
        Self::of(file, OperationKind::SetKey { path: path.into(), value })
    }

    #[must_use]
    pub fn replace_line(
        file: impl Into<String>,
        pattern: impl Into<String>,
        replacement: impl Into<String>,
    ) -> Self {
        Self::of(
            file,
            OperationKind::ReplaceLine {
                pattern: pattern.into(),
                replacement: replacement.into(),
            },
        )
    }

    #[must_use]
    pub fn add_line(file: impl Into<String>, content: impl Into<String>, anchor: impl Into<String>) -> Self {
        Self::of(
            file,
            OperationKind::AddLine {
                content: content.into(),
                anchor: anchor.into(),
            },
        )
    }

    #[must_use]
    pub fn delete_line(file: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::of(file, OperationKind::DeleteLine { pattern: pattern.into() })
    }

    #[must_use]
    pub fn restore_file(file: impl Into<String>, backup_key: impl Into<String>) -> Self {
        Self::of(file, OperationKind::RestoreFile { backup_key: backup_key.into() })
    }

    fn of(file: impl Into<String>, kind: OperationKind) -> Self {
        Self {
            file: file.into(),
            kind,
            expected_prior_value: None,
        }
    }

    /// Attach an expected prior value
    #[inline]
    #[must_use]
    pub fn expecting(mut self, value: ConfigTree) -> Self {
        self.expected_prior_value = Some(value);
        self
    }

    /// Plugin that owns this operation's file
    #[must_use]
    pub fn plugin(&self) -> &str {
        plugin_of(&self.file)
    }
}

/// Unit of work for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub id: RequestId,
    pub target_server: String,
    pub target_instance: String,
    pub operations: Vec<ChangeOperation>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl ChangeRequest {
    /// Create an empty request with a fresh id
    #[must_use]
    pub fn new(
        target_server: impl Into<String>,
        target_instance: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            id: RequestId::new(),
            target_server: target_server.into(),
            target_instance: target_instance.into(),
            operations: Vec::new(),
            created_by: created_by.into(),
            created_at: Utc::now(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_id(mut self, id: impl Into<RequestId>) -> Self {
        self.id = id.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_operation(mut self, op: ChangeOperation) -> Self {
        self.operations.push(op);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// Structural checks that do not need the filesystem
    ///
    /// # Errors
    /// Returns the first shape problem found.
    pub fn validate_shape(&self) -> Result<(), ModelError> {
        if !self.id.is_valid() {
            return Err(ModelError::InvalidId(self.id.to_string()));
        }
        if self.target_server.trim().is_empty() {
            return Err(ModelError::EmptyField("target_server"));
        }
        if !is_plain_name(&self.target_instance) {
            return Err(ModelError::EmptyField("target_instance"));
        }
        if self.operations.is_empty() {
            return Err(ModelError::NoOperations);
        }
        for (index, op) in self.operations.iter().enumerate() {
            let bad = |reason: &str| ModelError::BadOperation {
                index,
                reason: reason.to_string(),
            };
            if op.file.trim().is_empty() {
                return Err(bad("empty file"));
            }
            match &op.kind {
                OperationKind::SetKey { path, .. } if path.is_empty() => {
                    return Err(bad("empty key path"))
                }
                OperationKind::ReplaceLine { pattern, .. } | OperationKind::DeleteLine { pattern }
                    if pattern.is_empty() =>
                {
                    return Err(bad("empty pattern"))
                }
                OperationKind::RestoreFile { backup_key } if backup_key.is_empty() => {
                    return Err(bad("empty backup key"))
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Distinct files in first-touch order
    #[must_use]
    pub fn touched_files(&self) -> Vec<&str> {
        let mut files: Vec<&str> = Vec::new();
        for op in &self.operations {
            if !files.contains(&op.file.as_str()) {
                files.push(&op.file);
            }
        }
        files
    }
}

/// Plugin owning a file: `plugins/{plugin}/...` or `server` for anything else
#[must_use]
pub fn plugin_of(file: &str) -> &str {
    let mut parts = Path::new(file).components().filter_map(|c| match c {
        Component::Normal(s) => s.to_str(),
        _ => None,
    });
    match (parts.next(), parts.next(), parts.next()) {
        (Some("plugins"), Some(plugin), Some(_)) => plugin,
        _ => "server",
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.trim().is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn operation_wire_format() {
        let op = ChangeOperation::set_key("plugins/Essentials/config.yml", "x", ConfigTree::int(3))
            .expecting(ConfigTree::int(2));
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(
            value,
            json!({
                "file": "plugins/Essentials/config.yml",
                "kind": "SetKey",
                "path": "x",
                "value": 3,
                "expected_prior_value": 2
            })
        );
        let back: ChangeOperation = serde_json::from_value(value).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn add_line_anchor_defaults_empty() {
        let op: ChangeOperation = serde_json::from_value(json!({
            "file": "motd.txt",
            "kind": "AddLine",
            "content": "welcome"
        }))
        .unwrap();
        assert_eq!(op, ChangeOperation::add_line("motd.txt", "welcome", ""));
    }

    #[test]
    fn unknown_kind_rejected() {
        let parsed: Result<ChangeOperation, _> = serde_json::from_value(json!({
            "file": "a.yml",
            "kind": "Explode"
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn request_id_validation() {
        assert!(RequestId::from("01HZX-dev.1_a").is_valid());
        assert!(!RequestId::from("../etc").is_valid());
        assert!(!RequestId::from("").is_valid());
        assert!(RequestId::new().is_valid());
    }

    #[test]
    fn shape_validation() {
        let base = ChangeRequest::new("node-1", "lobby", "ops");
        assert_eq!(base.validate_shape(), Err(ModelError::NoOperations));

        let ok = base
            .clone()
            .with_operation(ChangeOperation::delete_line("motd.txt", "^spam"));
        assert!(ok.validate_shape().is_ok());

        let bad = base.with_operation(ChangeOperation::delete_line("motd.txt", ""));
        assert!(matches!(
            bad.validate_shape(),
            Err(ModelError::BadOperation { index: 0, .. })
        ));

        let escaping = ChangeRequest::new("node-1", "../lobby", "ops")
            .with_operation(ChangeOperation::delete_line("motd.txt", "x"));
        assert!(escaping.validate_shape().is_err());
    }

    #[test]
    fn touched_files_dedup_in_order() {
        let req = ChangeRequest::new("n", "i", "u")
            .with_operation(ChangeOperation::delete_line("b.txt", "x"))
            .with_operation(ChangeOperation::delete_line("a.txt", "x"))
            .with_operation(ChangeOperation::delete_line("b.txt", "y"));
        assert_eq!(req.touched_files(), vec!["b.txt", "a.txt"]);
    }

    #[test]
    fn plugin_from_path() {
        assert_eq!(plugin_of("plugins/Essentials/config.yml"), "Essentials");
        assert_eq!(plugin_of("plugins/Essentials/sub/x.yml"), "Essentials");
        assert_eq!(plugin_of("server.properties"), "server");
        assert_eq!(plugin_of("plugins/loose.jar"), "server");
    }
}
