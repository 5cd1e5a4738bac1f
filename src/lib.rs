//! # VIVARIUM
//!
//! Multi-process predator-prey ecosystem simulator.
//!
//! One OS process per living individual plus one environment coordinator;
//! they communicate only through sockets, per-agent message queues and a
//! shared world snapshot slot - never through in-process shared objects.
//!
//! ## Architecture
//!
//! - [`coordinator`] - the authoritative tick loop and state machine
//! - [`store`] - version-stamped world snapshots (in-process + shared slot)
//! - [`bus`] - per-agent action queues and the lifecycle channel
//! - [`supervisor`] - one-process-per-agent lifecycle and health checks
//! - [`agent`] - agent records, decision policies, the child process loop
//! - [`server`] - control socket server (REST commands + snapshot stream)
//! - [`protocol`] - closed wire schemas shared by all of the above
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use vivarium::config::Config;
//! use vivarium::coordinator::handle::CoordinatorHandle;
//! use vivarium::protocol::ControlCommand;
//!
//! let config = Config::default();
//! let handle = CoordinatorHandle::spawn(config, 42).unwrap();
//! handle.send(ControlCommand::Start, None).unwrap();
//! ```

pub mod agent;
pub mod bus;
pub mod config;
pub mod coordinator;
pub mod fault;
pub mod grid;
pub mod protocol;
pub mod server;
pub mod stats;
pub mod store;
pub mod supervisor;

// Re-export main types
pub use agent::{AgentId, AgentKind, AgentRecord, Position};
pub use config::Config;
pub use coordinator::{CoordinatorState, Environment};
pub use store::WorldView;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
