//! Plain data types shared across the workspace.

mod command;
mod context;
mod proxy;
mod wire;

pub use command::*;
pub use context::*;
pub use proxy::*;
pub use wire::*;
