//! Safety validation
//!
//! Every precondition of a request is checked before any file is touched.
//! The validator only reads: it never writes, locks or creates anything.
//! All violations are collected so a failed result explains everything that
//! is wrong at once.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use confsync_model::{ChangeRequest, ConfigTree, FileFormat, OperationKind};
use tracing::{debug, warn};

use crate::error::{ValidationError, Violation};
use crate::lines::{compile, LineBuffer};
use crate::locks::{externally_locked, FileLockRegistry};

/// Resolve `file` inside `instance_dir`
///
/// Returns `None` for absolute paths, `..` components, or paths whose
/// existing prefix resolves (through symlinks) outside the instance.
#[must_use]
pub fn resolve_file(instance_dir: &Path, file: &str) -> Option<PathBuf> {
    let relative = Path::new(file);
    if relative.as_os_str().is_empty()
        || relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return None;
    }
    let joined = instance_dir.join(relative);

    // Symlinks may still point elsewhere
    if let (Ok(root), Ok(real)) = (instance_dir.canonicalize(), joined.canonicalize()) {
        if !real.starts_with(&root) {
            return None;
        }
    }
    Some(joined)
}

/// Precondition checks for a change request
#[derive(Debug, Clone)]
pub struct SafetyValidator {
    min_free_bytes: u64,
    locks: Arc<FileLockRegistry>,
}

impl SafetyValidator {
    #[must_use]
    pub fn new(locks: Arc<FileLockRegistry>) -> Self {
        Self {
            min_free_bytes: 64 * 1024 * 1024,
            locks,
        }
    }

    /// Free space that must remain after backups are written
    #[inline]
    #[must_use]
    pub fn with_min_free_bytes(mut self, bytes: u64) -> Self {
        self.min_free_bytes = bytes;
        self
    }

    /// Validate a request against `instances_root/{target_instance}`
    ///
    /// # Errors
    /// `ValidationError` listing every violation found
    pub fn validate(&self, instances_root: &Path, request: &ChangeRequest) -> Result<(), ValidationError> {
        let violations = self.check(instances_root, request);
        if violations.is_empty() {
            debug!(request = %request.id, "Validation passed");
            Ok(())
        } else {
            Err(ValidationError { violations })
        }
    }

    /// Collect all violations (empty = pass)
    #[must_use]
    pub fn check(&self, instances_root: &Path, request: &ChangeRequest) -> Vec<Violation> {
        let instance_dir = instances_root.join(&request.target_instance);
        if !instance_dir.is_dir() {
            return vec![Violation::InstanceNotFound {
                instance: request.target_instance.clone(),
            }];
        }

        let mut violations = Vec::new();
        let mut contents: HashMap<&str, Result<String, String>> = HashMap::new();
        let mut existing: Vec<(&str, PathBuf)> = Vec::new();

        for (index, op) in request.operations.iter().enumerate() {
            let file = op.file.as_str();
            let Some(path) = resolve_file(&instance_dir, file) else {
                push_once(&mut violations, Violation::PathEscape { file: file.to_string() });
                continue;
            };

            let exists = path.is_file();
            if exists {
                if !existing.iter().any(|(f, _)| *f == file) {
                    existing.push((file, path.clone()));
                }
            } else if !matches!(op.kind, OperationKind::RestoreFile { .. }) {
                push_once(&mut violations, Violation::FileNotFound { file: file.to_string() });
                continue;
            }

            let malformed = |reason: String| Violation::MalformedOperation { index, reason };
            let format = FileFormat::from_path(file);

            match &op.kind {
                OperationKind::SetKey { path: key, .. } => {
                    if !format.is_structured() {
                        violations.push(malformed(format!(
                            "SetKey needs a structured format, '{file}' is {format}"
                        )));
                    } else if let Err(e) = format.key_path(key) {
                        violations.push(malformed(e.to_string()));
                    }
                }
                OperationKind::ReplaceLine { pattern, .. } | OperationKind::DeleteLine { pattern } => {
                    if let Err(e) = compile(pattern) {
                        violations.push(malformed(e.to_string()));
                    }
                }
                OperationKind::AddLine { anchor, .. } => {
                    if !anchor.is_empty() {
                        if let Err(e) = compile(anchor) {
                            violations.push(malformed(e.to_string()));
                        }
                    }
                }
                OperationKind::RestoreFile { .. } => {}
            }

            let Some(expected) = &op.expected_prior_value else {
                continue;
            };
            let text = contents
                .entry(file)
                .or_insert_with(|| std::fs::read_to_string(&path).map_err(|e| e.to_string()));
            let text = text.as_deref().map_err(String::as_str);
            if let Some(v) = check_expected(index, file, format, &op.kind, expected, text) {
                violations.push(v);
            }
        }

        self.check_disk(&instance_dir, &existing, &mut violations);

        for (file, path) in &existing {
            if let Some(holder) = self.locks.holder(path) {
                violations.push(Violation::FileLocked {
                    file: (*file).to_string(),
                    holder,
                });
            } else if externally_locked(path) {
                violations.push(Violation::FileLocked {
                    file: (*file).to_string(),
                    holder: "another process".to_string(),
                });
            }
        }

        violations
    }

    fn check_disk(&self, instance_dir: &Path, existing: &[(&str, PathBuf)], violations: &mut Vec<Violation>) {
        let backup_bytes: u64 = existing
            .iter()
            .filter_map(|(_, path)| std::fs::metadata(path).ok())
            .map(|m| m.len())
            .sum();
        let required = self.min_free_bytes.saturating_add(backup_bytes);
        match fs2::available_space(instance_dir) {
            Ok(available) if available < required => {
                violations.push(Violation::InsufficientDisk { required, available });
            }
            Ok(_) => {}
            Err(e) => warn!(dir = %instance_dir.display(), error = %e, "Could not query free space"),
        }
    }
}

fn push_once(violations: &mut Vec<Violation>, violation: Violation) {
    if !violations.contains(&violation) {
        violations.push(violation);
    }
}

fn check_expected(
    index: usize,
    file: &str,
    format: FileFormat,
    kind: &OperationKind,
    expected: &ConfigTree,
    text: Result<&str, &str>,
) -> Option<Violation> {
    let conflict = |path: &str, observed: Option<ConfigTree>| Violation::ConcurrencyConflict {
        index,
        file: file.to_string(),
        path: path.to_string(),
        expected: expected.clone(),
        observed,
    };
    // A guard that cannot be read is a violation, never a pass
    let unreadable = |message: &str| Violation::Unparsable {
        file: file.to_string(),
        message: format!("cannot read as text: {message}"),
    };

    match kind {
        OperationKind::SetKey { path, .. } => {
            let text = match text {
                Ok(text) => text,
                Err(message) => return Some(unreadable(message)),
            };
            let key = format.key_path(path).ok()?;
            let tree = match format.parse(text) {
                Ok(tree) => tree,
                Err(e) => {
                    return Some(Violation::Unparsable {
                        file: file.to_string(),
                        message: e.to_string(),
                    })
                }
            };
            let observed = tree.get(&key).cloned();
            (observed.as_ref() != Some(expected)).then(|| conflict(path, observed))
        }
        OperationKind::ReplaceLine { pattern, .. } => {
            let text = match text {
                Ok(text) => text,
                Err(message) => return Some(unreadable(message)),
            };
            let regex = compile(pattern).ok()?;
            let buf = LineBuffer::parse(text);
            let hits = buf.matching(&regex);
            // Zero or several matches fail later as NoMatch/AmbiguousMatch
            let [line] = hits.as_slice() else {
                return None;
            };
            let observed = buf.lines()[*line].clone();
            let wanted = match expected {
                ConfigTree::Scalar(s) => s.render(),
                other => other.render(),
            };
            (observed != wanted).then(|| conflict(pattern, Some(ConfigTree::string(observed))))
        }
        other => Some(Violation::MalformedOperation {
            index,
            reason: format!(
                "expected_prior_value is only supported on SetKey and ReplaceLine, not {}",
                other.kind_name()
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confsync_model::ChangeOperation;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SafetyValidator) {
        let dir = TempDir::new().unwrap();
        let instance = dir.path().join("lobby");
        std::fs::create_dir_all(instance.join("plugins/Essentials")).unwrap();
        std::fs::write(instance.join("plugins/Essentials/config.yml"), "x: 2\nname: lobby\n").unwrap();
        std::fs::write(instance.join("server.properties"), "max-players=20\n").unwrap();
        std::fs::write(instance.join("motd.txt"), "hello\n").unwrap();
        (dir, SafetyValidator::new(FileLockRegistry::new()).with_min_free_bytes(0))
    }

    fn request(op: ChangeOperation) -> ChangeRequest {
        ChangeRequest::new("node-1", "lobby", "ops").with_operation(op)
    }

    #[test]
    fn matching_expected_value_passes() {
        let (dir, validator) = setup();
        let req = request(
            ChangeOperation::set_key("plugins/Essentials/config.yml", "x", ConfigTree::int(3))
                .expecting(ConfigTree::int(2)),
        );
        assert!(validator.validate(dir.path(), &req).is_ok());
    }

    #[test]
    fn stale_expected_value_conflicts() {
        let (dir, validator) = setup();
        let req = request(
            ChangeOperation::set_key("plugins/Essentials/config.yml", "x", ConfigTree::int(3))
                .expecting(ConfigTree::int(1)),
        );
        let err = validator.validate(dir.path(), &req).unwrap_err();
        assert!(matches!(
            &err.violations[..],
            [Violation::ConcurrencyConflict { observed: Some(o), .. }] if *o == ConfigTree::int(2)
        ));
    }

    #[test]
    fn expected_comparison_is_strict() {
        let (dir, validator) = setup();
        let req = request(
            ChangeOperation::set_key("plugins/Essentials/config.yml", "x", ConfigTree::int(3))
                .expecting(ConfigTree::string("2")),
        );
        assert!(validator.validate(dir.path(), &req).is_err());
    }

    #[test]
    fn replace_line_expected_is_the_matched_line() {
        let (dir, validator) = setup();
        let ok = request(
            ChangeOperation::replace_line("server.properties", "^max-players=", "max-players=50")
                .expecting(ConfigTree::string("max-players=20")),
        );
        assert!(validator.validate(dir.path(), &ok).is_ok());
        let stale = request(
            ChangeOperation::replace_line("server.properties", "^max-players=", "max-players=50")
                .expecting(ConfigTree::string("max-players=10")),
        );
        assert!(validator.validate(dir.path(), &stale).is_err());
    }

    #[test]
    fn non_utf8_file_fails_the_expected_value_guard() {
        let (dir, validator) = setup();
        std::fs::write(dir.path().join("lobby/server.properties"), b"max-players=\xff\xfe\n").unwrap();
        std::fs::write(dir.path().join("lobby/plugins/Essentials/config.yml"), b"x: \xff\n").unwrap();

        let replace = request(
            ChangeOperation::replace_line("server.properties", "^max-players=", "max-players=50")
                .expecting(ConfigTree::string("max-players=20")),
        );
        let set = request(
            ChangeOperation::set_key("plugins/Essentials/config.yml", "x", ConfigTree::int(3))
                .expecting(ConfigTree::int(2)),
        );
        for req in [replace, set] {
            let err = validator.validate(dir.path(), &req).unwrap_err();
            assert!(matches!(&err.violations[..], [Violation::Unparsable { .. }]));
            assert_eq!(err.violations[0].reason_code(), confsync_model::ReasonCode::ParseFailed);
        }
    }

    #[test]
    fn missing_instance_and_file() {
        let (dir, validator) = setup();
        let req = ChangeRequest::new("node-1", "survival", "ops")
            .with_operation(ChangeOperation::delete_line("motd.txt", "x"));
        assert_eq!(
            validator.check(dir.path(), &req),
            vec![Violation::InstanceNotFound { instance: "survival".into() }]
        );

        let req = request(ChangeOperation::delete_line("plugins/Nope/config.yml", "x"));
        assert_eq!(
            validator.check(dir.path(), &req),
            vec![Violation::FileNotFound { file: "plugins/Nope/config.yml".into() }]
        );
    }

    #[test]
    fn restore_may_target_missing_file() {
        let (dir, validator) = setup();
        let req = request(ChangeOperation::restore_file("plugins/Gone/config.yml", "lobby/Gone/k"));
        assert!(validator.check(dir.path(), &req).is_empty());
    }

    #[test]
    fn escaping_paths_rejected() {
        let (dir, validator) = setup();
        for file in ["../other/server.properties", "/etc/passwd"] {
            let req = request(ChangeOperation::delete_line(file, "x"));
            assert!(matches!(
                validator.check(dir.path(), &req)[..],
                [Violation::PathEscape { .. }]
            ));
        }
    }

    #[test]
    fn malformed_operations() {
        let (dir, validator) = setup();
        let bad_regex = request(ChangeOperation::delete_line("motd.txt", "(unclosed"));
        let set_on_text = request(ChangeOperation::set_key("motd.txt", "a", ConfigTree::int(1)));
        let expected_on_add = request(
            ChangeOperation::add_line("motd.txt", "x", "").expecting(ConfigTree::int(1)),
        );
        for req in [bad_regex, set_on_text, expected_on_add] {
            assert!(matches!(
                validator.check(dir.path(), &req)[..],
                [Violation::MalformedOperation { index: 0, .. }]
            ));
        }
    }

    #[test]
    fn held_file_is_locked() {
        let (dir, _) = setup();
        let registry = FileLockRegistry::new();
        let validator = SafetyValidator::new(Arc::clone(&registry)).with_min_free_bytes(0);
        let path = resolve_file(&dir.path().join("lobby"), "motd.txt").unwrap();
        let _guard = registry.try_acquire(path, "other-request").unwrap();

        let req = request(ChangeOperation::delete_line("motd.txt", "hello"));
        assert!(matches!(
            &validator.check(dir.path(), &req)[..],
            [Violation::FileLocked { holder, .. }] if holder == "other-request"
        ));
    }

    #[test]
    fn impossible_disk_floor() {
        let (dir, _) = setup();
        let validator = SafetyValidator::new(FileLockRegistry::new()).with_min_free_bytes(u64::MAX);
        let req = request(ChangeOperation::delete_line("motd.txt", "hello"));
        assert!(matches!(
            validator.check(dir.path(), &req)[..],
            [Violation::InsufficientDisk { .. }]
        ));
    }
}
