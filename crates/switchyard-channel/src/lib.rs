//! # Switchyard Channel
//!
//! Transports to external automation processes.
//!
//! - [`ManagedProcess`] - spawn, log, watch and terminate a child process
//! - [`PollingChannel`] - request-per-connection Unix socket protocol
//! - [`StreamChannel`] - persistent `<len>:<json>` TCP stream
//! - [`FrameCodec`] - the length-prefixed frame codec

mod codec;
mod factory;
mod polling;
mod process;
mod stream;

pub use codec::{Frame, FrameCodec};
pub use factory::channel_from_config;
pub use polling::{PollingChannel, PollingOptions};
pub use process::{LineHandler, ManagedProcess, ProcessSpec};
pub use stream::{StreamChannel, StreamOptions};
