//! Testing utilities for the confsync workspace
//!
//! Shared fixtures: a temporary node layout (instances, baselines,
//! backups, state), request builders and object store helpers.

#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use confsync_model::{ChangeOperation, ChangeRequest, ChangeResult, ConfigTree, RequestId};
use confsync_store::{get_json_opt, layout, put_json, MemoryStore, ObjectStore};
use tempfile::TempDir;

pub const SERVER: &str = "node-1";
pub const INSTANCE: &str = "lobby";
pub const AGENT: &str = "agent-node-1";

/// A throwaway node filesystem
///
/// ```text
/// {root}/instances/{instance}/...
/// {root}/baselines/{plugin}/...
/// {root}/backups/
/// {root}/state/
/// ```
#[derive(Debug)]
pub struct NodeFixture {
    dir: TempDir,
}

impl NodeFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        for sub in ["instances", "baselines", "backups", "state"] {
            std::fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn instances_root(&self) -> PathBuf {
        self.root().join("instances")
    }

    pub fn baseline_root(&self) -> PathBuf {
        self.root().join("baselines")
    }

    pub fn backup_root(&self) -> PathBuf {
        self.root().join("backups")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root().join("state")
    }

    pub fn instance_dir(&self, instance: &str) -> PathBuf {
        self.instances_root().join(instance)
    }

    /// Create an empty instance directory
    pub fn with_instance(self, instance: &str) -> Self {
        std::fs::create_dir_all(self.instance_dir(instance)).unwrap();
        self
    }

    /// Write a file relative to an instance directory
    pub fn with_file(self, instance: &str, file: &str, content: &str) -> Self {
        self.write(instance, file, content);
        self
    }

    /// Write a baseline file for `plugin`
    pub fn with_baseline(self, plugin: &str, file: &str, content: &str) -> Self {
        write_file(&self.baseline_root().join(plugin).join(file), content.as_bytes());
        self
    }

    pub fn write(&self, instance: &str, file: &str, content: &str) {
        write_file(&self.instance_dir(instance).join(file), content.as_bytes());
    }

    pub fn read(&self, instance: &str, file: &str) -> String {
        std::fs::read_to_string(self.instance_dir(instance).join(file)).unwrap()
    }

    pub fn read_bytes(&self, instance: &str, file: &str) -> Vec<u8> {
        std::fs::read(self.instance_dir(instance).join(file)).unwrap()
    }

    /// Every file under the backup root, relative to it
    pub fn backup_files(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect(&self.backup_root(), &self.backup_root(), &mut out);
        out.sort();
        out
    }
}

impl Default for NodeFixture {
    fn default() -> Self {
        Self::new()
    }
}

fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, bytes).unwrap();
}

fn collect(base: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect(base, &path, out);
        } else if let Ok(rel) = path.strip_prefix(base) {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
}

/// Request against the default server and instance
pub fn request(operations: Vec<ChangeOperation>) -> ChangeRequest {
    request_for(SERVER, INSTANCE, operations)
}

pub fn request_for(server: &str, instance: &str, operations: Vec<ChangeOperation>) -> ChangeRequest {
    operations
        .into_iter()
        .fold(ChangeRequest::new(server, instance, "tests"), ChangeRequest::with_operation)
}

/// `SetKey` with an optional expected prior value
pub fn set_key(file: &str, path: &str, value: ConfigTree, expected: Option<ConfigTree>) -> ChangeOperation {
    let op = ChangeOperation::set_key(file, path, value);
    match expected {
        Some(prior) => op.expecting(prior),
        None => op,
    }
}

pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

/// Put a request under its server's pending prefix
pub async fn enqueue<S: ObjectStore + ?Sized>(store: &S, request: &ChangeRequest) {
    put_json(
        store,
        layout::CHANGES,
        &layout::pending_key(&request.target_server, &request.id),
        request,
    )
    .await
    .unwrap();
}

/// The stored Result for `id`, if any
pub async fn result_of<S: ObjectStore + ?Sized>(store: &S, id: &RequestId) -> Option<ChangeResult> {
    get_json_opt(store, layout::CHANGES, &layout::result_key(id))
        .await
        .unwrap()
}
