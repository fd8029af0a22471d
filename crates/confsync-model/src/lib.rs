//! confsync data model
//!
//! Types shared by agents, the control plane and tests.
//!
//! # Core Concepts
//!
//! - [`ConfigTree`]: format-independent parsed config file (scalar, list or map)
//! - [`FileFormat`]: YAML / JSON / TOML / properties / plain text, by extension
//! - [`ChangeRequest`] and [`ChangeOperation`]: file mutations for one instance
//! - [`ChangeResult`]: terminal outcome of a request, written once
//! - [`DriftReport`]: divergences of one instance from its baseline
//! - [`ContentHash`]: Blake3 checksum of backup bytes
//!
//! # Example
//!
//! ```rust,ignore
//! use confsync_model::{ChangeOperation, ChangeRequest, ConfigTree};
//!
//! let request = ChangeRequest::new("node-1", "lobby", "ops")
//!     .with_operation(
//!         ChangeOperation::set_key("plugins/Essentials/config.yml", "x", ConfigTree::int(3))
//!             .expecting(ConfigTree::int(2)),
//!     );
//! request.validate_shape()?;
//! let json = serde_json::to_vec(&request)?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod drift;
pub mod error;
pub mod format;
mod hash;
mod path;
pub mod reason;
pub mod request;
pub mod result;
pub mod time;
mod tree;

pub use drift::{DriftItem, DriftKind, DriftReport};
pub use error::{ModelError, ParseError, TreeError};
pub use format::{FileFormat, FormatCodec};
pub use hash::{ContentHash, HashError};
pub use path::{KeyPath, PathError};
pub use reason::ReasonCode;
pub use request::{plugin_of, ChangeOperation, ChangeRequest, OperationKind, RequestId};
pub use result::{BackupRef, ChangeResult, Diagnostic, OperationOutcome, ResultStatus};
pub use tree::{ConfigTree, Scalar};

/// Prelude for common imports
pub mod prelude {
    pub use crate::{
        ChangeOperation, ChangeRequest, ChangeResult, ConfigTree, Diagnostic, DriftItem,
        DriftKind, DriftReport, FileFormat, KeyPath, OperationKind, ReasonCode, RequestId,
        ResultStatus, Scalar,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
