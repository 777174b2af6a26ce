//! # Switchyard Queue
//!
//! Per-session command queue feeding the native backend.
//!
//! ## Features
//!
//! - Exactly one command in flight, dispatched in acceptance order
//! - Context-switch and remote-busy gates
//! - Pluggable command classification and execution
//! - Fail-fast once the backend is gone

pub mod classify;
pub mod error;
pub mod executor;
pub mod gates;
pub mod options;
pub mod queue;

pub use classify::{CommandClass, CommandClassifier, PrefixClassifier};
pub use error::QueueError;
pub use executor::{ChannelExecutor, CommandExecutor};
pub use gates::{GateGuard, QueueGates};
pub use options::QueueOptions;
pub use queue::{CommandQueue, CommandResult};
