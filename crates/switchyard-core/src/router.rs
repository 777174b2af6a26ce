//! Per-request routing between the native queue and the proxy target.

use regex::Regex;
use serde_json::Value;
use switchyard_config::ProxyConfig;
use switchyard_protocols::{ProxyCell, ProxyError, ProxyTarget};

/// Where a request is served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Handled by this server (native queue or built-in handler).
    Local,
    /// Forwarded to the secondary server.
    Proxy(ProxyTarget),
}

#[derive(Debug, Clone)]
struct CompiledRule {
    method: String,
    path: Regex,
}

/// Decides, per request, whether to forward it.
///
/// Paths are relative to the server prefix, e.g. `/session/abc/url`.
#[derive(Debug, Clone)]
pub struct ProxyRouter {
    exclusions: Vec<CompiledRule>,
    proxy: ProxyCell,
}

impl ProxyRouter {
    pub fn new(config: &ProxyConfig, proxy: ProxyCell) -> Result<Self, ProxyError> {
        let exclusions = config
            .exclusions
            .iter()
            .map(|rule| {
                Regex::new(&rule.path)
                    .map(|path| CompiledRule {
                        method: rule.method.to_ascii_uppercase(),
                        path,
                    })
                    .map_err(|e| ProxyError::Request(format!("bad exclusion '{}': {}", rule.path, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { exclusions, proxy })
    }

    pub fn decide(&self, method: &str, path: &str) -> Route {
        if is_session_lifecycle(method, path) || self.is_excluded(method, path) {
            return Route::Local;
        }
        match self.proxy.target() {
            Some(target) => Route::Proxy(target),
            None => Route::Local,
        }
    }

    fn is_excluded(&self, method: &str, path: &str) -> bool {
        self.exclusions
            .iter()
            .any(|rule| rule.method.eq_ignore_ascii_case(method) && rule.path.is_match(path))
    }
}

/// `POST /session` and `DELETE /session/:id` always stay local.
fn is_session_lifecycle(method: &str, path: &str) -> bool {
    let trimmed = path.trim_end_matches('/');
    if method.eq_ignore_ascii_case("POST") && trimmed == "/session" {
        return true;
    }
    method.eq_ignore_ascii_case("DELETE")
        && trimmed
            .strip_prefix("/session/")
            .is_some_and(|id| !id.is_empty() && !id.contains('/'))
}

/// Rewrite `/session/{local_id}` to the target's session and build the URL.
pub fn rewrite_url(path: &str, local_id: &str, target: &ProxyTarget) -> String {
    let prefix = format!("/session/{}", local_id);
    match path.strip_prefix(&prefix) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => target.session_url(rest),
        _ => target.url(path),
    }
}

/// Replace a forwarded response's `sessionId` with this server's id.
pub fn rewrite_session_id(body: &mut Value, local_id: &str) {
    if let Some(object) = body.as_object_mut() {
        if let Some(session_id) = object.get_mut("sessionId") {
            if !session_id.is_null() {
                *session_id = Value::String(local_id.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use switchyard_config::ExclusionRule;
    use switchyard_protocols::ProxyState;

    fn target() -> ProxyTarget {
        ProxyTarget::new("127.0.0.1", 9515, "/wd/hub", "remote-1")
    }

    fn proxying_router() -> ProxyRouter {
        let proxy = ProxyCell::new(ProxyState::proxy(target()));
        ProxyRouter::new(&ProxyConfig::default(), proxy).unwrap()
    }

    #[test]
    fn test_direct_mode_is_local() {
        let router = ProxyRouter::new(&ProxyConfig::default(), ProxyCell::default()).unwrap();
        assert_eq!(router.decide("GET", "/session/abc/url"), Route::Local);
    }

    #[test]
    fn test_proxy_mode_forwards() {
        let router = proxying_router();
        assert_eq!(router.decide("GET", "/session/abc/url"), Route::Proxy(target()));
        assert_eq!(router.decide("POST", "/session/abc/element"), Route::Proxy(target()));
    }

    #[test]
    fn test_session_lifecycle_never_proxied() {
        let router = proxying_router();
        assert_eq!(router.decide("POST", "/session"), Route::Local);
        assert_eq!(router.decide("DELETE", "/session/abc"), Route::Local);
        assert_eq!(
            router.decide("DELETE", "/session/abc/cookie"),
            Route::Proxy(target())
        );
    }

    #[test]
    fn test_default_exclusions_stay_local() {
        let router = proxying_router();
        assert_eq!(router.decide("GET", "/session/abc/context"), Route::Local);
        assert_eq!(router.decide("POST", "/session/abc/context"), Route::Local);
        assert_eq!(router.decide("GET", "/session/abc/contexts"), Route::Local);
        assert_eq!(router.decide("GET", "/session/abc/window_handles"), Route::Local);
        assert_eq!(router.decide("POST", "/session/abc/window"), Route::Local);
        assert_eq!(router.decide("DELETE", "/session/abc/window"), Route::Proxy(target()));
    }

    #[test]
    fn test_alert_endpoints_stay_local() {
        let router = proxying_router();
        assert_eq!(router.decide("GET", "/session/abc/alert_text"), Route::Local);
        assert_eq!(router.decide("POST", "/session/abc/alert_text"), Route::Local);
        assert_eq!(router.decide("POST", "/session/abc/accept_alert"), Route::Local);
        assert_eq!(router.decide("POST", "/session/abc/dismiss_alert"), Route::Local);
    }

    #[test]
    fn test_custom_exclusion() {
        let config = ProxyConfig {
            exclusions: vec![ExclusionRule::new("get", r"^/session/[^/]+/screenshot$")],
        };
        let router = ProxyRouter::new(&config, ProxyCell::new(ProxyState::proxy(target()))).unwrap();
        assert_eq!(router.decide("GET", "/session/abc/screenshot"), Route::Local);
        assert_eq!(router.decide("GET", "/session/abc/context"), Route::Proxy(target()));
    }

    #[test]
    fn test_bad_exclusion_rejected() {
        let config = ProxyConfig {
            exclusions: vec![ExclusionRule::new("GET", "(")],
        };
        assert!(ProxyRouter::new(&config, ProxyCell::default()).is_err());
    }

    #[test]
    fn test_router_follows_proxy_cell() {
        let proxy = ProxyCell::default();
        let router = ProxyRouter::new(&ProxyConfig::default(), proxy.clone()).unwrap();
        assert_eq!(router.decide("GET", "/session/abc/url"), Route::Local);

        proxy.set(ProxyState::proxy(target()));
        assert_eq!(router.decide("GET", "/session/abc/url"), Route::Proxy(target()));
    }

    #[test]
    fn test_rewrite_url() {
        assert_eq!(
            rewrite_url("/session/local-1/url", "local-1", &target()),
            "http://127.0.0.1:9515/wd/hub/session/remote-1/url"
        );
        assert_eq!(
            rewrite_url("/session/local-1", "local-1", &target()),
            "http://127.0.0.1:9515/wd/hub/session/remote-1"
        );
        assert_eq!(
            rewrite_url("/status", "local-1", &target()),
            "http://127.0.0.1:9515/wd/hub/status"
        );
    }

    #[test]
    fn test_rewrite_session_id() {
        let mut body = json!({"sessionId": "remote-1", "status": 0, "value": "x"});
        rewrite_session_id(&mut body, "local-1");
        assert_eq!(body["sessionId"], "local-1");

        let mut body = json!({"value": {"sessionId": "remote-1"}});
        rewrite_session_id(&mut body, "local-1");
        assert_eq!(body["value"]["sessionId"], "remote-1");
    }
}
