//! # Switchyard Protocols
//!
//! Shared definitions for the Switchyard workspace. Contains only
//! interface definitions and plain data types, no I/O.
//!
//! ## Core Traits
//!
//! - [`BackendChannel`] - Transport to one external automation process
//! - [`ContextDiscovery`] - Platform lookup of reachable web views
//!
//! ## Core Types
//!
//! - [`Command`] - Opaque command payload with an identity
//! - [`WireResponse`] / [`WireStatus`] - JSON-wire response envelope
//! - [`ProxyState`] / [`ProxyCell`] - Current reverse-proxy target

pub mod channel;
pub mod discovery;
pub mod error;
pub mod types;

pub use channel::{BackendChannel, ChannelState, ExitEvent, ExitStatusInfo};
pub use discovery::{ContextDiscovery, StaticDiscovery};
pub use error::{ChannelError, ContextError, ProxyError};
pub use types::*;
