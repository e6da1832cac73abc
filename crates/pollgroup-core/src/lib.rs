//! # pollgroup-core: Collaborator contracts
//!
//! The poll-group core decides which worker thread owns each fabric
//! connection. Everything it talks to is a collaborator behind a trait
//! defined here:
//!
//! - `transport` - per-worker transport poll groups and connection handles
//! - `subsystem` - subsystems, namespaces and their per-thread I/O channels
//! - `runtime` - thread identity, cross-thread messages, periodic pollers
//!
//! Shared value types live next to them:
//!
//! - `ids` - thread, poll group, subsystem and qpair identifiers
//! - `addr` - fixed-length transport addresses
//! - `qpair` - the connection object handed from acceptor to worker
//! - `error` - error types for every collaborator
//! - `env` - environment override helpers used by the config layers
//!
//! ## Design principle
//!
//! The core depends on these traits only. Default implementations live in
//! `pollgroup-module`; production transports plug in the same way.

pub mod addr;
pub mod env;
pub mod error;
pub mod ids;
pub mod qpair;
pub mod runtime;
pub mod subsystem;
pub mod transport;

// Re-exports for convenience
pub use addr::{HostAddr, TransportAddr, TRADDR_MAX_LEN};
pub use env::{env_get, env_get_bool, env_get_micros, env_get_opt};
pub use error::{AddrError, ConfigError, PollError, RuntimeError, SubsystemError, TransportError};
pub use ids::{PollGroupId, PollGroupRef, QpairId, SubsystemId, ThreadId, TransportKind};
pub use qpair::{Qpair, QpairState, TransportConn};
pub use runtime::{BroadcastFn, Msg, PollFn, PollerId, ThreadRuntime};
pub use subsystem::{IoChannel, Namespace, Subsystem};
pub use transport::{Transport, TransportPollGroup};
