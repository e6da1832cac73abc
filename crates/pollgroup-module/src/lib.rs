//! # pollgroup-module: Default (safe) implementations
//!
//! This crate provides a default implementation for every collaborator
//! contract in `pollgroup-core`. Each one favours correctness and
//! observability over raw speed.
//!
//! ## Default stack
//!
//! | Trait           | Default Impl       | Notes                                  |
//! |-----------------|--------------------|----------------------------------------|
//! | ThreadRuntime   | EventLoopPool      | N OS threads, SegQueue mailbox each    |
//! | Transport       | LoopbackTransport  | in-process qpairs, injected work       |
//! | Subsystem       | MemSubsystem       | counter-backed namespaces              |

pub mod config;
pub mod event_loop;
pub mod loopback;
pub mod mem_subsystem;
mod poller;
mod thread;

// Re-exports
pub use config::RuntimeConfig;
pub use event_loop::{EventLoopPool, ThreadStats};
pub use loopback::{LoopbackPeer, LoopbackStats, LoopbackTransport, LOOPBACK};
pub use mem_subsystem::{MemNamespace, MemSubsystem};
