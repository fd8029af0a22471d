//! Config updater
//!
//! Applies a validated request's operations in order. The first operation
//! touching a file snapshots it through the [`BackupSink`] before anything
//! is written. When an operation or the post-apply parse check fails, every
//! touched file is restored byte-for-byte (files the request created are
//! removed) before the failure is returned.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use confsync_model::{
    BackupRef, ChangeOperation, ChangeRequest, ConfigTree, ContentHash, FileFormat,
    OperationKind, OperationOutcome, ParseError,
};
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::backup::{Backup, BackupSink};
use crate::edit::{set_property, set_yaml_scalar};
use crate::error::ApplyError;
use crate::lines::{compile, LineBuffer};
use crate::locks::{FileLockGuard, FileLockRegistry};
use crate::validator::resolve_file;

/// Everything a successful apply produced
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyReport {
    /// Before/after per operation, in request order
    pub outcomes: Vec<OperationOutcome>,
    /// One per pre-existing touched file
    pub backups: Vec<BackupRef>,
}

/// A failed apply, after rollback
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct ApplyFailure {
    /// Operation that failed; `None` when post-apply verification failed
    pub failed_index: Option<usize>,
    #[source]
    pub error: ApplyError,
    /// Files restored to their pre-request bytes
    pub restored: Vec<String>,
    /// Files that could not be restored (should be empty)
    pub rollback_errors: Vec<String>,
}

struct Touched {
    file: String,
    path: PathBuf,
    /// Bytes before the request; `None` if the file did not exist
    original: Option<Vec<u8>>,
    backup: Option<BackupRef>,
    _guard: FileLockGuard,
}

/// Result of mutating one file's bytes
struct Mutation {
    bytes: Vec<u8>,
    before: Option<ConfigTree>,
    after: Option<ConfigTree>,
}

/// Applies change operations with backup and rollback
#[derive(Clone)]
pub struct ConfigUpdater {
    sink: Arc<dyn BackupSink>,
    locks: Arc<FileLockRegistry>,
}

impl ConfigUpdater {
    #[must_use]
    pub fn new(sink: Arc<dyn BackupSink>, locks: Arc<FileLockRegistry>) -> Self {
        Self { sink, locks }
    }

    /// Apply every operation of `request` inside `instance_dir`
    ///
    /// # Errors
    /// `ApplyFailure` after all touched files were rolled back
    pub async fn apply(&self, instance_dir: &Path, request: &ChangeRequest) -> Result<ApplyReport, ApplyFailure> {
        info!(
            request = %request.id,
            instance = %request.target_instance,
            operations = request.operations.len(),
            "Applying change request"
        );

        let mut touched: Vec<Touched> = Vec::new();
        let mut outcomes = Vec::with_capacity(request.operations.len());

        for (index, op) in request.operations.iter().enumerate() {
            match self.apply_one(instance_dir, request, index, op, &mut touched).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(error) => return Err(self.fail(request, Some(index), error, touched).await),
            }
        }

        if let Err(error) = verify(&touched).await {
            return Err(self.fail(request, None, error, touched).await);
        }

        let backups = touched.iter().filter_map(|t| t.backup.clone()).collect();
        info!(request = %request.id, files = touched.len(), "Change request applied");
        Ok(ApplyReport { outcomes, backups })
    }

    async fn apply_one(
        &self,
        instance_dir: &Path,
        request: &ChangeRequest,
        index: usize,
        op: &ChangeOperation,
        touched: &mut Vec<Touched>,
    ) -> Result<OperationOutcome, ApplyError> {
        let path = resolve_file(instance_dir, &op.file).ok_or_else(|| ApplyError::PathEscape {
            file: op.file.clone(),
        })?;

        if !touched.iter().any(|t| t.file == op.file) {
            let entry = self.first_touch(request, op, path.clone()).await?;
            touched.push(entry);
        }

        let current = read_optional(&path).await?;
        let mutation = match (&op.kind, current) {
            (OperationKind::RestoreFile { backup_key }, _) => {
                let bytes = self.sink.fetch(backup_key).await?;
                let checksum = ContentHash::compute(&bytes);
                Mutation {
                    bytes,
                    before: None,
                    after: Some(ConfigTree::string(checksum.to_string())),
                }
            }
            (_, None) => return Err(ApplyError::NotFound { file: op.file.clone() }),
            (kind, Some(bytes)) => mutate(&op.file, kind, bytes)?,
        };

        write_atomic(&path, &mutation.bytes).await?;
        debug!(index, file = %op.file, kind = op.kind.kind_name(), "Operation applied");

        Ok(OperationOutcome {
            index,
            kind: op.kind.kind_name().to_string(),
            file: op.file.clone(),
            before: mutation.before,
            after: mutation.after,
        })
    }

    /// Lock and back up a file the first time the request touches it
    async fn first_touch(&self, request: &ChangeRequest, op: &ChangeOperation, path: PathBuf) -> Result<Touched, ApplyError> {
        let guard = self
            .locks
            .try_acquire(path.clone(), request.id.as_str())
            .map_err(|holder| ApplyError::Locked {
                file: op.file.clone(),
                holder,
            })?;

        let original = read_optional(&path).await?;
        let backup = match &original {
            Some(bytes) => {
                let backup = Backup::capture(&request.target_instance, &op.file, bytes.clone(), Utc::now());
                self.sink.persist(&backup).await?;
                debug!(file = %op.file, key = %backup.key.key(), "Backup taken");
                Some(backup.to_ref())
            }
            None if matches!(op.kind, OperationKind::RestoreFile { .. }) => None,
            None => return Err(ApplyError::NotFound { file: op.file.clone() }),
        };

        Ok(Touched {
            file: op.file.clone(),
            path,
            original,
            backup,
            _guard: guard,
        })
    }

    async fn fail(
        &self,
        request: &ChangeRequest,
        failed_index: Option<usize>,
        error: ApplyError,
        touched: Vec<Touched>,
    ) -> ApplyFailure {
        warn!(
            request = %request.id,
            operation = ?failed_index,
            error = %error,
            files = touched.len(),
            "Change request failed, rolling back"
        );
        let (restored, rollback_errors) = rollback(&touched).await;
        if !rollback_errors.is_empty() {
            error!(request = %request.id, files = ?rollback_errors, "Rollback incomplete");
        }
        ApplyFailure {
            failed_index,
            error,
            restored,
            rollback_errors,
        }
    }
}

/// Restore every touched file, newest first
async fn rollback(touched: &[Touched]) -> (Vec<String>, Vec<String>) {
    let mut restored = Vec::new();
    let mut failed = Vec::new();
    for t in touched.iter().rev() {
        let outcome = match &t.original {
            Some(bytes) => write_atomic(&t.path, bytes).await,
            None => match fs::remove_file(&t.path).await {
                Err(e) if e.kind() != ErrorKind::NotFound => Err(ApplyError::io(&t.path, e)),
                _ => Ok(()),
            },
        };
        match outcome {
            Ok(()) => restored.push(t.file.clone()),
            Err(e) => {
                error!(file = %t.file, error = %e, "Failed to restore file");
                failed.push(t.file.clone());
            }
        }
    }
    (restored, failed)
}

/// Every touched structured file must still parse
async fn verify(touched: &[Touched]) -> Result<(), ApplyError> {
    for t in touched {
        let format = FileFormat::from_path(&t.file);
        if !format.is_structured() {
            continue;
        }
        let Some(bytes) = read_optional(&t.path).await? else {
            continue;
        };
        let text = decode(&t.file, format, bytes)?;
        format.parse(&text).map_err(|source| ApplyError::Parse {
            file: t.file.clone(),
            source,
        })?;
    }
    Ok(())
}

fn decode(file: &str, format: FileFormat, bytes: Vec<u8>) -> Result<String, ApplyError> {
    String::from_utf8(bytes).map_err(|_| ApplyError::Parse {
        file: file.to_string(),
        source: ParseError::Syntax {
            format,
            message: "file is not valid UTF-8".to_string(),
        },
    })
}

fn mutate(file: &str, kind: &OperationKind, bytes: Vec<u8>) -> Result<Mutation, ApplyError> {
    let format = FileFormat::from_path(file);
    let text = decode(file, format, bytes)?;

    let (new_text, before, after) = match kind {
        OperationKind::SetKey { path, value } => {
            let (new_text, before) = set_key(file, format, &text, path, value)?;
            (new_text, before, Some(value.clone()))
        }
        OperationKind::ReplaceLine { pattern, replacement } => {
            let regex = compile(pattern)?;
            let mut buf = LineBuffer::parse(&text);
            let (old, new) = buf.replace_line(file, &regex, replacement)?;
            (buf.render(), Some(ConfigTree::string(old)), Some(ConfigTree::string(new)))
        }
        OperationKind::AddLine { content, anchor } => {
            let regex = if anchor.is_empty() {
                None
            } else {
                Some(compile(anchor)?)
            };
            let mut buf = LineBuffer::parse(&text);
            buf.add_line(file, content, regex.as_ref())?;
            (buf.render(), None, Some(ConfigTree::string(content.clone())))
        }
        OperationKind::DeleteLine { pattern } => {
            let regex = compile(pattern)?;
            let mut buf = LineBuffer::parse(&text);
            let removed = buf.delete_lines(file, &regex)?;
            let removed = ConfigTree::List(removed.into_iter().map(ConfigTree::string).collect());
            (buf.render(), Some(removed), None)
        }
        OperationKind::RestoreFile { .. } => unreachable!("restore is handled before mutate"),
    };

    Ok(Mutation {
        bytes: new_text.into_bytes(),
        before,
        after,
    })
}

/// Set a key, editing in place where the format allows
fn set_key(
    file: &str,
    format: FileFormat,
    text: &str,
    raw_path: &str,
    value: &ConfigTree,
) -> Result<(String, Option<ConfigTree>), ApplyError> {
    if !format.is_structured() {
        return Err(ApplyError::UnsupportedFormat {
            file: file.to_string(),
            format,
        });
    }
    let key = format.key_path(raw_path).map_err(|e| ApplyError::InvalidKey {
        path: raw_path.to_string(),
        message: e.to_string(),
    })?;
    let parse_err = |source| ApplyError::Parse {
        file: file.to_string(),
        source,
    };
    let tree = format.parse(text).map_err(parse_err)?;
    let before = tree.get(&key).cloned();

    match format {
        FileFormat::Yaml => {
            let mut buf = LineBuffer::parse(text);
            if set_yaml_scalar(&mut buf, &key, value).is_some() {
                let candidate = buf.render();
                let landed = format
                    .parse(&candidate)
                    .ok()
                    .is_some_and(|t| t.get(&key) == Some(value));
                if landed {
                    return Ok((candidate, before));
                }
            }
        }
        FileFormat::Properties => {
            let ConfigTree::Scalar(scalar) = value else {
                return Err(parse_err(ParseError::Unrepresentable {
                    format,
                    what: format!("{} value for '{raw_path}'", value.kind_name()),
                }));
            };
            let mut buf = LineBuffer::parse(text);
            set_property(&mut buf, raw_path, &scalar.render());
            return Ok((buf.render(), before));
        }
        _ => {}
    }

    let mut tree = tree;
    tree.set(&key, value.clone()).map_err(|source| ApplyError::Tree {
        file: file.to_string(),
        source,
    })?;
    let rendered = format.render(&tree).map_err(parse_err)?;
    Ok((rendered, before))
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, ApplyError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ApplyError::io(path, e)),
    }
}

/// Write through a sibling temp file and rename into place
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ApplyError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)
        .await
        .map_err(|e| ApplyError::io(dir, e))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = dir.join(format!(".{name}.confsync.tmp"));
    fs::write(&temp, bytes)
        .await
        .map_err(|e| ApplyError::io(&temp, e))?;
    if let Err(e) = fs::rename(&temp, path).await {
        let _ = fs::remove_file(&temp).await;
        return Err(ApplyError::io(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::LocalBackupDir;
    use confsync_model::ChangeOperation;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        instance: PathBuf,
        backups: Arc<LocalBackupDir>,
        updater: ConfigUpdater,
    }

    fn fixture(files: &[(&str, &str)]) -> Fixture {
        let dir = TempDir::new().unwrap();
        let instance = dir.path().join("instances/lobby");
        for (file, content) in files {
            let path = instance.join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        std::fs::create_dir_all(&instance).unwrap();
        let backups = Arc::new(LocalBackupDir::new(dir.path().join("backups")));
        let updater = ConfigUpdater::new(backups.clone(), FileLockRegistry::new());
        Fixture {
            _dir: dir,
            instance,
            backups,
            updater,
        }
    }

    fn read(f: &Fixture, file: &str) -> String {
        std::fs::read_to_string(f.instance.join(file)).unwrap()
    }

    fn request(ops: Vec<ChangeOperation>) -> ChangeRequest {
        ops.into_iter().fold(ChangeRequest::new("node-1", "lobby", "ops"), |r, op| {
            r.with_operation(op)
        })
    }

    #[tokio::test]
    async fn set_key_in_yaml_keeps_comments() {
        let f = fixture(&[("plugins/Essentials/config.yml", "# main\nx: 2 # tuned\n")]);
        let req = request(vec![ChangeOperation::set_key(
            "plugins/Essentials/config.yml",
            "x",
            ConfigTree::int(3),
        )]);
        let report = f.updater.apply(&f.instance, &req).await.unwrap();
        assert_eq!(read(&f, "plugins/Essentials/config.yml"), "# main\nx: 3 # tuned\n");
        assert_eq!(report.outcomes[0].before, Some(ConfigTree::int(2)));
        assert_eq!(report.outcomes[0].after, Some(ConfigTree::int(3)));
        assert_eq!(report.backups.len(), 1);
    }

    #[tokio::test]
    async fn set_key_creates_nested_maps_in_json() {
        let f = fixture(&[("plugins/Shop/prices.json", "{\"a\": 1}")]);
        let req = request(vec![ChangeOperation::set_key(
            "plugins/Shop/prices.json",
            "tools.pick",
            ConfigTree::int(5),
        )]);
        f.updater.apply(&f.instance, &req).await.unwrap();
        let tree = FileFormat::Json.parse(&read(&f, "plugins/Shop/prices.json")).unwrap();
        assert_eq!(tree.get(&"tools.pick".parse().unwrap()), Some(&ConfigTree::int(5)));
        assert_eq!(tree.get(&"a".parse().unwrap()), Some(&ConfigTree::int(1)));
    }

    #[tokio::test]
    async fn one_backup_per_file_per_request() {
        let f = fixture(&[("motd.txt", "a\nb\n")]);
        let req = request(vec![
            ChangeOperation::add_line("motd.txt", "c", ""),
            ChangeOperation::delete_line("motd.txt", "^a$"),
        ]);
        let report = f.updater.apply(&f.instance, &req).await.unwrap();
        assert_eq!(report.backups.len(), 1);
        assert_eq!(f.backups.list("lobby").await.unwrap().len(), 1);
        assert_eq!(read(&f, "motd.txt"), "b\nc\n");
        let stored = f.backups.fetch(&report.backups[0].key).await.unwrap();
        assert_eq!(stored, b"a\nb\n");
        assert!(report.backups[0].checksum.matches(b"a\nb\n"));
    }

    #[tokio::test]
    async fn missing_second_file_rolls_back_first() {
        let original = "x: 2\n";
        let f = fixture(&[("plugins/Essentials/config.yml", original)]);
        let req = request(vec![
            ChangeOperation::set_key("plugins/Essentials/config.yml", "x", ConfigTree::int(3)),
            ChangeOperation::set_key("plugins/Missing/config.yml", "y", ConfigTree::int(1)),
        ]);
        let failure = f.updater.apply(&f.instance, &req).await.unwrap_err();
        assert_eq!(failure.failed_index, Some(1));
        assert!(matches!(failure.error, ApplyError::NotFound { .. }));
        assert_eq!(failure.restored, vec!["plugins/Essentials/config.yml".to_string()]);
        assert_eq!(read(&f, "plugins/Essentials/config.yml"), original);
    }

    #[tokio::test]
    async fn replace_without_match_changes_nothing() {
        let original = "motd=hi\r\nmax-players=20\r\n";
        let f = fixture(&[("server.properties", original)]);
        let req = request(vec![ChangeOperation::replace_line(
            "server.properties",
            "^pvp=",
            "pvp=false",
        )]);
        let failure = f.updater.apply(&f.instance, &req).await.unwrap_err();
        assert!(matches!(failure.error, ApplyError::NoMatch { .. }));
        assert_eq!(read(&f, "server.properties"), original);
    }

    #[tokio::test]
    async fn verification_failure_rolls_back_everything() {
        let f = fixture(&[
            ("motd.txt", "hello\n"),
            ("plugins/Essentials/config.yml", "a: 1\nb: 2\n"),
        ]);
        let req = request(vec![
            ChangeOperation::add_line("motd.txt", "world", ""),
            // Breaks the YAML: the parse check after all operations must catch it
            ChangeOperation::add_line("plugins/Essentials/config.yml", "c: [unclosed", ""),
        ]);
        let failure = f.updater.apply(&f.instance, &req).await.unwrap_err();
        assert_eq!(failure.failed_index, None);
        assert!(matches!(failure.error, ApplyError::Parse { .. }));
        assert_eq!(read(&f, "motd.txt"), "hello\n");
        assert_eq!(read(&f, "plugins/Essentials/config.yml"), "a: 1\nb: 2\n");
    }

    #[tokio::test]
    async fn properties_set_key_uses_flat_keys() {
        let f = fixture(&[("server.properties", "query.port=25565\nmotd=hi\n")]);
        let req = request(vec![ChangeOperation::set_key(
            "server.properties",
            "query.port",
            ConfigTree::int(25566),
        )]);
        let report = f.updater.apply(&f.instance, &req).await.unwrap();
        assert_eq!(read(&f, "server.properties"), "query.port=25566\nmotd=hi\n");
        assert_eq!(report.outcomes[0].before, Some(ConfigTree::string("25565")));
    }

    #[tokio::test]
    async fn restore_recreates_and_rollback_removes() {
        let f = fixture(&[("motd.txt", "hi\n")]);
        let backup = Backup::capture("lobby", "plugins/Gone/config.yml", b"k: v\n".to_vec(), Utc::now());
        f.backups.persist(&backup).await.unwrap();

        let ok = request(vec![ChangeOperation::restore_file(
            "plugins/Gone/config.yml",
            backup.key.key(),
        )]);
        let report = f.updater.apply(&f.instance, &ok).await.unwrap();
        assert!(report.backups.is_empty());
        assert_eq!(read(&f, "plugins/Gone/config.yml"), "k: v\n");

        std::fs::remove_file(f.instance.join("plugins/Gone/config.yml")).unwrap();
        let failing = request(vec![
            ChangeOperation::restore_file("plugins/Gone/config.yml", backup.key.key()),
            ChangeOperation::delete_line("motd.txt", "^nothing$"),
        ]);
        f.updater.apply(&f.instance, &failing).await.unwrap_err();
        assert!(!f.instance.join("plugins/Gone/config.yml").exists());
        assert_eq!(read(&f, "motd.txt"), "hi\n");
    }

    #[tokio::test]
    async fn locks_released_after_apply() {
        let f = fixture(&[("motd.txt", "hi\n")]);
        let locks = FileLockRegistry::new();
        let updater = ConfigUpdater::new(f.backups.clone(), Arc::clone(&locks));
        let req = request(vec![ChangeOperation::add_line("motd.txt", "x", "")]);
        updater.apply(&f.instance, &req).await.unwrap();
        assert!(locks.is_empty());
    }
}
