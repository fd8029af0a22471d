//! The object store contract
//!
//! The store is the only channel between the control plane and agents.
//! Implementations must make `put` an idempotent overwrite. `list` may lag
//! recent writes; `get` may not.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;

/// Durable key/object storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write (or overwrite) an object
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), StoreError>;

    /// Read an object
    ///
    /// # Errors
    /// `StoreError::NotFound` if the object does not exist
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Keys under `prefix`, sorted. May omit very recent writes.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Delete an object; deleting a missing object succeeds
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError>;

    /// Whether an object exists
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        match self.get(bucket, key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Copy an object, possibly across buckets
    async fn copy(
        &self,
        from_bucket: &str,
        from_key: &str,
        to_bucket: &str,
        to_key: &str,
    ) -> Result<(), StoreError> {
        let bytes = self.get(from_bucket, from_key).await?;
        self.put(to_bucket, to_key, bytes).await
    }

    /// Logical move: copy then delete
    async fn move_object(
        &self,
        from_bucket: &str,
        from_key: &str,
        to_bucket: &str,
        to_key: &str,
    ) -> Result<(), StoreError> {
        self.copy(from_bucket, from_key, to_bucket, to_key).await?;
        self.delete(from_bucket, from_key).await
    }
}

#[async_trait]
impl<S: ObjectStore + ?Sized> ObjectStore for Arc<S> {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        (**self).put(bucket, key, bytes).await
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        (**self).get(bucket, key).await
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        (**self).list(bucket, prefix).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        (**self).delete(bucket, key).await
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        (**self).exists(bucket, key).await
    }

    async fn copy(
        &self,
        from_bucket: &str,
        from_key: &str,
        to_bucket: &str,
        to_key: &str,
    ) -> Result<(), StoreError> {
        (**self).copy(from_bucket, from_key, to_bucket, to_key).await
    }

    async fn move_object(
        &self,
        from_bucket: &str,
        from_key: &str,
        to_bucket: &str,
        to_key: &str,
    ) -> Result<(), StoreError> {
        (**self).move_object(from_bucket, from_key, to_bucket, to_key).await
    }
}

/// Serialize `value` as pretty JSON and store it
///
/// # Errors
/// Serialization or store failure
pub async fn put_json<S, T>(store: &S, bucket: &str, key: &str, value: &T) -> Result<(), StoreError>
where
    S: ObjectStore + ?Sized,
    T: Serialize + Sync,
{
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Serialization {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    store.put(bucket, key, bytes).await
}

/// Fetch and deserialize a JSON object
///
/// # Errors
/// `NotFound`, store failure, or `Serialization` when the bytes are not
/// valid JSON for `T`
pub async fn get_json<S, T>(store: &S, bucket: &str, key: &str) -> Result<T, StoreError>
where
    S: ObjectStore + ?Sized,
    T: DeserializeOwned,
{
    let bytes = store.get(bucket, key).await?;
    serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Like [`get_json`] but maps `NotFound` to `None`
///
/// # Errors
/// Store failure other than not-found, or bad JSON
pub async fn get_json_opt<S, T>(store: &S, bucket: &str, key: &str) -> Result<Option<T>, StoreError>
where
    S: ObjectStore + ?Sized,
    T: DeserializeOwned,
{
    match get_json(store, bucket, key).await {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Reject keys that are empty or could escape a bucket directory
///
/// # Errors
/// `StoreError::InvalidKey`
pub fn check_key(key: &str) -> Result<(), StoreError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        Err(StoreError::InvalidKey(key.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_checks() {
        assert!(check_key("pending/node-1/abc.json").is_ok());
        assert!(check_key("").is_err());
        assert!(check_key("/abs").is_err());
        assert!(check_key("a/../b").is_err());
        assert!(check_key("a//b").is_err());
        assert!(check_key("a/").is_err());
    }
}
