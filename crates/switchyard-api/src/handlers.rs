//! WebDriver endpoint handlers.
//!
//! Every request reaching these handlers is served locally: proxied
//! requests were already answered by the proxy middleware.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{Method, Uri};
use serde_json::{Map, Value, json};
use switchyard_core::Session;
use switchyard_protocols::WireResponse;
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

type ApiResult = Result<Json<WireResponse>, ApiError>;

/// Parse an optional JSON body; an empty body is `null`.
fn parse_body(body: &Bytes) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

fn session(state: &AppState, id: &str) -> Result<Arc<Session>, ApiError> {
    Ok(state.registry.get(id)?)
}

/// GET /status
pub async fn status(State(state): State<Arc<AppState>>) -> Json<WireResponse> {
    Json(WireResponse::success(
        None,
        json!({
            "build": { "version": env!("CARGO_PKG_VERSION") },
            "ready": state.registry.current().is_none(),
            "uptime_secs": state.uptime().as_secs(),
        }),
    ))
}

/// GET /sessions
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<WireResponse> {
    let sessions: Vec<Value> = state
        .registry
        .list()
        .iter()
        .map(|session| session.describe())
        .collect();
    Json(WireResponse::success(None, Value::Array(sessions)))
}

/// POST /session
pub async fn create_session(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult {
    let desired = match parse_body(&body)?.get("desiredCapabilities") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(caps)) => caps.clone(),
        Some(other) => {
            return Err(ApiError::BadRequest(format!(
                "desiredCapabilities must be an object, got {}",
                other
            )));
        }
    };

    let session = state.registry.create(desired).await?;
    info!(session_id = %session.id(), "New session created");
    Ok(Json(WireResponse::success(
        Some(session.id().to_string()),
        Value::Object(session.capabilities().clone()),
    )))
}

/// GET /session/{id}
pub async fn get_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let session = session(&state, &id)?;
    session.touch();
    Ok(Json(WireResponse::success(
        Some(id),
        Value::Object(session.capabilities().clone()),
    )))
}

/// DELETE /session/{id}
pub async fn delete_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    state.registry.delete(&id).await?;
    Ok(Json(WireResponse::success(Some(id), Value::Null)))
}

/// GET /session/{id}/context
pub async fn get_context(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let session = session(&state, &id)?;
    session.touch();
    let current = session.current_context();
    Ok(Json(WireResponse::success(Some(id), json!(current.name()))))
}

/// POST /session/{id}/context
pub async fn set_context(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let session = session(&state, &id)?;
    let name = match parse_body(&body)?.get("name") {
        None | Some(Value::Null) => None,
        Some(Value::String(name)) => Some(name.clone()),
        Some(other) => {
            return Err(ApiError::BadRequest(format!(
                "context name must be a string, got {}",
                other
            )));
        }
    };
    session
        .set_context(name.as_deref())
        .await
        .map_err(|e| ApiError::session(&id, e))?;
    Ok(Json(WireResponse::success(Some(id), Value::Null)))
}

/// GET /session/{id}/contexts
pub async fn list_contexts(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let session = session(&state, &id)?;
    let contexts = session
        .list_contexts()
        .await
        .map_err(|e| ApiError::session(&id, e))?;
    Ok(Json(WireResponse::success(Some(id), json!(contexts))))
}

/// Any other `/session/{id}/...` request: run it on the native backend
/// as `{method, path, body}` with the path relative to the session.
pub async fn session_command(
    State(state): State<Arc<AppState>>,
    Path((id, rest)): Path<(String, String)>,
    method: Method,
    body: Bytes,
) -> ApiResult {
    let session = session(&state, &id)?;
    let payload = json!({
        "method": method.as_str(),
        "path": format!("/{}", rest),
        "body": parse_body(&body)?,
    });
    let response = session
        .execute(payload)
        .await
        .map_err(|e| ApiError::session(&id, e))?;
    Ok(Json(response))
}

/// Fallback for routes outside the WebDriver surface.
pub async fn unknown_command(method: Method, uri: Uri) -> ApiError {
    ApiError::UnknownCommand {
        method: method.to_string(),
        path: uri.path().to_string(),
    }
}
