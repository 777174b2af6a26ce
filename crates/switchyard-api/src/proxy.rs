//! Reverse proxy to the active secondary server.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde_json::Value;
use switchyard_core::{Route, Session, rewrite_session_id, rewrite_url};
use switchyard_protocols::{ProxyError, ProxyTarget};
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Forwards requests verbatim and rewrites session ids in responses.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    pub fn new(timeout: Duration) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProxyError::Request(e.to_string()))?;
        Ok(Self { client })
    }

    /// Forward `request` (path relative to the server prefix) to `target`.
    pub async fn forward(
        &self,
        session: &Session,
        target: &ProxyTarget,
        request: Request,
    ) -> Result<Response, ApiError> {
        let proxy_error = |source: ProxyError| ApiError::Proxy {
            session_id: session.id().to_string(),
            source,
        };

        let (parts, body) = request.into_parts();
        let mut url = rewrite_url(parts.uri.path(), session.id(), target);
        if let Some(query) = parts.uri.query() {
            url.push('?');
            url.push_str(query);
        }
        let body = to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;

        let _lane = session.enter_remote().await;
        debug!(session_id = %session.id(), %method, %url, "Proxying request");
        let mut outbound = self.client.request(method, &url);
        if let Some(content_type) = parts.headers.get(header::CONTENT_TYPE) {
            outbound = outbound.header(header::CONTENT_TYPE.as_str(), content_type.as_bytes());
        }
        if !body.is_empty() {
            outbound = outbound.body(body);
        }

        let response = outbound
            .send()
            .await
            .map_err(|e| proxy_error(ProxyError::Request(e.to_string())))?;
        let status = StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE.as_str())
            .and_then(|v| HeaderValue::from_bytes(v.as_bytes()).ok());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| proxy_error(ProxyError::InvalidResponse(e.to_string())))?;

        let bytes = match serde_json::from_slice::<Value>(&bytes) {
            Ok(mut json) => {
                rewrite_session_id(&mut json, session.id());
                Bytes::from(json.to_string())
            }
            Err(_) => bytes,
        };

        let mut response = (status, Body::from(bytes)).into_response();
        if let Some(content_type) = content_type {
            response.headers_mut().insert(header::CONTENT_TYPE, content_type);
        }
        Ok(response)
    }
}

/// Session id of a `/session/{id}/...` path.
fn session_id_from_path(path: &str) -> Option<&str> {
    let rest = path.strip_prefix("/session/")?;
    let id = rest.split('/').next()?;
    (!id.is_empty()).then_some(id)
}

/// Middleware: forward the request when the session's router says so.
pub async fn proxy_requests(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let Some(session) = session_id_from_path(&path).and_then(|id| state.registry.get(id).ok())
    else {
        return next.run(request).await;
    };

    match session.route(request.method().as_str(), &path) {
        Route::Local => next.run(request).await,
        Route::Proxy(target) => state
            .forwarder
            .forward(&session, &target, request)
            .await
            .unwrap_or_else(IntoResponse::into_response),
    }
}
