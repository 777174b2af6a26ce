//! # Switchyard API
//!
//! WebDriver HTTP surface of the Switchyard server.
//!
//! ```text
//!  client ──HTTP──▶ proxy middleware ──▶ secondary WebDriver server
//!                        │ (local)
//!                        ▼
//!                  session handlers ──▶ command queue ──▶ native backend
//! ```
//!
//! Every route lives under the configured base path (default `/wd/hub`).
//! Requests for a session in a web view context are forwarded verbatim
//! unless the exclusion list keeps them local.

pub mod error;
pub mod handlers;
pub mod proxy;
pub mod routes;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use proxy::Forwarder;
pub use routes::create_router;
pub use server::ApiServer;
pub use state::AppState;
