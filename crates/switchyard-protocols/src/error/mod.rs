//! Error types for the Switchyard protocol layer.

mod channel;
mod context;
mod proxy;

pub use channel::*;
pub use context::*;
pub use proxy::*;
