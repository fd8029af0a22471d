//! confsync deployment pipeline
//!
//! Dev first, then prod after explicit approval, with rollback from any
//! point. The stage logic is a pure function; the [`Coordinator`] moves
//! deployments along by reading and writing the object store.
//!
//! # Core Concepts
//!
//! - [`Stage`] / [`Event`] / [`transition`]: the exhaustively matched state
//!   machine
//! - [`Deployment`]: persisted record with the transition history and the
//!   per-target requests of each stage
//! - [`Coordinator`]: create, advance, approve, retry, rollback, status
//!
//! # Example
//!
//! ```rust,ignore
//! use confsync_pipeline::{Coordinator, DeploymentSpec, PipelineConfig, Target};
//!
//! let coordinator = Coordinator::new(store, PipelineConfig::default());
//! let deployment = coordinator.create(spec, Utc::now()).await?;
//! // ... agents pick up the dev requests ...
//! let deployment = coordinator.advance(&deployment.id, Utc::now()).await?;
//! coordinator.approve(&deployment.id, "alice", Utc::now()).await?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod coordinator;
mod deployment;
mod error;
mod stage;

pub use coordinator::{Coordinator, PipelineConfig};
pub use deployment::{Deployment, DeploymentSpec, HistoryEntry, Target, TargetRun};
pub use error::PipelineError;
pub use stage::{allowed_transitions, transition, Event, Stage, TransitionError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
