//! Filesystem-backed object store
//!
//! Objects live at `root/{bucket}/{key}`. Writes go to a hidden temp file in
//! the target directory and are renamed into place, so readers never see a
//! half-written object. Suitable for a shared mount.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::error::StoreError;
use crate::store::{check_key, ObjectStore};

const TEMP_SUFFIX: &str = ".tmp";

/// Store rooted at a directory
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StoreError> {
        check_key(bucket)?;
        check_key(key)?;
        let mut path = self.root.join(bucket);
        for segment in key.split('/') {
            path.push(segment);
        }
        Ok(path)
    }
}

fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let path = self.object_path(bucket, key)?;
        let dir = path
            .parent()
            .ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;
        fs::create_dir_all(dir).await?;

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StoreError::InvalidKey(key.to_string()))?;
        let temp = dir.join(format!(".{name}.{:016x}{TEMP_SUFFIX}", rand::random::<u64>()));
        fs::write(&temp, &bytes).await?;
        if let Err(e) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.object_path(bucket, key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::not_found(bucket, key)),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        check_key(bucket)?;
        let base = self.root.join(bucket);
        let mut keys = Vec::new();
        let mut pending = vec![(base, String::new())];

        while let Some((dir, rel)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                let key = if rel.is_empty() {
                    name.clone()
                } else {
                    format!("{rel}/{name}")
                };
                if entry.file_type().await?.is_dir() {
                    // Only descend where the prefix can still match
                    if prefix.starts_with(&format!("{key}/")) || key.starts_with(prefix) {
                        pending.push((entry.path(), key));
                    }
                } else if !is_temp_name(&name) && key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let path = self.object_path(bucket, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        let path = self.object_path(bucket, key)?;
        Ok(fs::try_exists(&path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn roundtrip_and_layout() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        store
            .put("changes", "pending/node-1/r1.json", b"{}".to_vec())
            .await
            .unwrap();
        assert!(dir.path().join("changes/pending/node-1/r1.json").is_file());
        assert_eq!(
            store.get("changes", "pending/node-1/r1.json").await.unwrap(),
            b"{}"
        );
    }

    #[tokio::test]
    async fn list_nested_with_prefix() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        for key in ["pending/a/1.json", "pending/a/2.json", "pending/b/3.json", "completed/1.json"] {
            store.put("changes", key, vec![]).await.unwrap();
        }
        let keys = store.list("changes", "pending/a/").await.unwrap();
        assert_eq!(keys, vec!["pending/a/1.json", "pending/a/2.json"]);
        assert_eq!(store.list("changes", "").await.unwrap().len(), 4);
        assert!(store.list("missing-bucket", "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        assert!(store.get("b", "k").await.unwrap_err().is_not_found());
        store.delete("b", "k").await.unwrap();
        store.put("b", "k", b"x".to_vec()).await.unwrap();
        assert!(store.exists("b", "k").await.unwrap());
        store.delete("b", "k").await.unwrap();
        assert!(!store.exists("b", "k").await.unwrap());
    }

    #[tokio::test]
    async fn escaping_keys_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        let err = store.put("b", "../outside", vec![]).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }
}
