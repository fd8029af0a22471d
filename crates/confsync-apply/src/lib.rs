//! confsync apply engine
//!
//! Turns a [`ChangeRequest`](confsync_model::ChangeRequest) into file
//! mutations on one server instance, never leaving a file half-changed.
//!
//! # Core Concepts
//!
//! - [`SafetyValidator`]: checks every precondition before any file is
//!   touched; all violations are reported together
//! - [`ConfigUpdater`]: applies operations in order, backing up each file on
//!   first touch and restoring all touched files if anything fails
//! - [`BackupSink`]: where snapshots go (local dir, object store, or both)
//! - [`FileLockRegistry`]: files held by in-flight requests in this process
//!
//! # Example
//!
//! ```rust,ignore
//! use confsync_apply::{ConfigUpdater, FileLockRegistry, LocalBackupDir, SafetyValidator};
//!
//! let locks = FileLockRegistry::new();
//! SafetyValidator::new(locks.clone()).validate(instances_root, &request)?;
//! let updater = ConfigUpdater::new(Arc::new(LocalBackupDir::new(backup_dir)), locks);
//! let report = updater.apply(&instances_root.join(&request.target_instance), &request).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod backup;
pub mod edit;
mod error;
pub mod lines;
mod locks;
mod updater;
mod validator;

pub use backup::{
    prune_backups, select_prunable, Backup, BackupSink, LocalBackupDir, RetentionPolicy,
    StoreBackupSink, TieredBackupSink,
};
pub use error::{ApplyError, BackupError, ValidationError, Violation};
pub use lines::{LineBuffer, LineEnding};
pub use locks::{externally_locked, FileLockGuard, FileLockRegistry};
pub use updater::{ApplyFailure, ApplyReport, ConfigUpdater};
pub use validator::{resolve_file, SafetyValidator};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
