//! confsync node agent
//!
//! One agent runs per node. It never accepts inbound connections: it polls
//! the object store for change requests addressed to its server and
//! publishes Results and drift reports back.
//!
//! # Core Concepts
//!
//! - [`AgentConfig`]: everything the agent needs, loaded from TOML once
//! - [`Agent`]: the change-apply and drift-scan schedules
//! - [`ResultJournal`]: local record that makes apply-then-crash safe
//! - [`PanelApi`]: vendor panel restarts after a completed change
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use confsync_agent::{Agent, AgentConfig};
//! use tokio::sync::watch;
//!
//! let config = Arc::new(AgentConfig::load("agent.toml".as_ref())?);
//! let store = config.store.build(&config.retry);
//! let agent = Agent::new(config, store)?;
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! agent.run(shutdown_rx).await;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod agent;
mod config;
mod error;
mod journal;
mod locks;
mod panel;

pub use agent::{Agent, AgentStats, ApplyCycleReport, RequestOutcome};
pub use config::{AgentConfig, PanelConfig, StoreConfig};
pub use error::{AgentError, ConfigError};
pub use journal::ResultJournal;
pub use locks::InstanceLocks;
pub use panel::{HttpPanelClient, PanelApi, PanelError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
