//! # Switchyard Core
//!
//! Composes one automation session out of a backend channel, a command
//! queue and a context state machine, and decides where each request goes.
//!
//! ## Components
//!
//! - [`SecondaryManager`] - starts, probes and stops secondary WebDriver servers
//! - [`ContextStateMachine`] - native/web view switching with a session cache
//! - [`ProxyRouter`] - local vs. forwarded routing and session id rewriting
//! - [`Session`] - one running automation session
//! - [`SessionFactory`] / [`StartupPipeline`] - ordered session startup
//! - [`SessionRegistry`] - the server's single active session

pub mod context;
pub mod discovery;
pub mod error;
pub mod factory;
pub mod lane;
pub mod normalize;
pub mod pipeline;
pub mod registry;
pub mod router;
pub mod secondary;
pub mod session;

pub use context::{ContextEvent, ContextStateMachine};
pub use discovery::ChannelDiscovery;
pub use error::SessionError;
pub use factory::{ChannelBuilder, SessionFactory};
pub use lane::{RemoteGuard, RemoteLane};
pub use normalize::normalize_native;
pub use pipeline::{EnterWebview, PrepareWorkDir, StartBackend, StartupPipeline, StartupStep};
pub use registry::SessionRegistry;
pub use router::{ProxyRouter, Route, rewrite_session_id, rewrite_url};
pub use secondary::{
    AttachedLauncher, LaunchedSecondary, ProcessLauncher, SecondaryLauncher, SecondaryManager,
    SecondaryOptions, SecondarySession,
};
pub use session::{Session, SessionParts};

#[cfg(test)]
mod test_support;
