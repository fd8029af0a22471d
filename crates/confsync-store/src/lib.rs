//! confsync object store access
//!
//! The object store is the only shared resource between the control plane
//! and node agents. This crate defines the access contract and the key
//! layout, plus three implementations:
//!
//! - [`MemoryStore`]: in-process, with simulated list lag and failures
//! - [`FsStore`]: a directory (local or a shared mount)
//! - [`RetryingStore`]: timeout + exponential backoff around any store
//!
//! # Example
//!
//! ```rust,ignore
//! use confsync_store::{layout, put_json, FsStore, RetryPolicy, RetryingStore};
//!
//! let store = RetryingStore::new(FsStore::new("/mnt/confsync"), RetryPolicy::default());
//! put_json(&store, layout::CHANGES, &layout::pending_key("node-1", &request.id), &request).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod fs;
pub mod layout;
mod memory;
mod retry;
mod store;

pub use error::StoreError;
pub use fs::FsStore;
pub use memory::MemoryStore;
pub use retry::{RetryPolicy, RetryingStore};
pub use store::{check_key, get_json, get_json_opt, put_json, ObjectStore};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
