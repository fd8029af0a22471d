//! In-memory object store
//!
//! Used by tests and single-process setups. Can simulate the two hazards
//! real stores have: list-after-write lag and transient unavailability.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::error::StoreError;
use crate::store::{check_key, ObjectStore};

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    written_at: Instant,
}

/// `DashMap`-backed store
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: DashMap<(String, String), StoredObject>,
    list_lag: Duration,
    failures: AtomicU32,
    puts: AtomicU64,
}

impl MemoryStore {
    /// Create empty store with no lag
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hide objects younger than `lag` from `list` (not from `get`)
    #[inline]
    #[must_use]
    pub fn with_list_lag(mut self, lag: Duration) -> Self {
        self.list_lag = lag;
        self
    }

    /// Make the next `n` calls fail with `Unavailable`
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Total successful `put` calls
    #[must_use]
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    /// All keys in a bucket, ignoring lag (test inspection)
    #[must_use]
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().0 == bucket)
            .map(|entry| entry.key().1.clone())
            .collect();
        keys.sort();
        keys
    }

    fn injected_failure(&self) -> Result<(), StoreError> {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(StoreError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.injected_failure()?;
        check_key(key)?;
        self.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                bytes,
                written_at: Instant::now(),
            },
        );
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        self.injected_failure()?;
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|entry| entry.bytes.clone())
            .ok_or_else(|| StoreError::not_found(bucket, key))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.injected_failure()?;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| {
                let (b, k) = entry.key();
                b == bucket
                    && k.starts_with(prefix)
                    && now.duration_since(entry.value().written_at) >= self.list_lag
            })
            .map(|entry| entry.key().1.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.injected_failure()?;
        self.objects.remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}
