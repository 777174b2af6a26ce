//! HTTP route definitions.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{any, get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::proxy::proxy_requests;
use crate::state::AppState;

#[cfg(test)]
#[path = "routes_tests.rs"]
mod tests;

/// Build the WebDriver router mounted under `base_path`.
///
/// ## Route Structure
///
/// ```text
/// GET    /status                     - Server status
/// GET    /sessions                   - Running sessions
/// POST   /session                    - Create the session
/// GET    /session/{id}               - Session capabilities
/// DELETE /session/{id}               - End the session
/// GET    /session/{id}/context       - Current context
/// POST   /session/{id}/context       - Switch context
/// GET    /session/{id}/contexts      - Available contexts
/// *      /session/{id}/{*command}    - Native command, or proxied in a web view
/// ```
pub fn create_router(state: Arc<AppState>, base_path: &str) -> Router {
    let api = Router::new()
        .route("/status", get(handlers::status))
        .route("/sessions", get(handlers::list_sessions))
        .route("/session", post(handlers::create_session))
        .route(
            "/session/{id}",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route(
            "/session/{id}/context",
            get(handlers::get_context).post(handlers::set_context),
        )
        .route("/session/{id}/contexts", get(handlers::list_contexts))
        .route("/session/{id}/{*command}", any(handlers::session_command))
        .layer(middleware::from_fn_with_state(state.clone(), proxy_requests))
        .with_state(state);

    let prefix = base_path.trim_end_matches('/');
    let router = if prefix.is_empty() {
        Router::new().merge(api)
    } else {
        Router::new().nest(prefix, api)
    };

    router
        .fallback(handlers::unknown_command)
        .layer(TraceLayer::new_for_http())
}
