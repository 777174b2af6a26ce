use super::*;

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use switchyard_config::Config;
use switchyard_core::{AttachedLauncher, SessionFactory, SessionRegistry};
use switchyard_protocols::{BackendChannel, ChannelError, ChannelState, ExitEvent};
use tokio::sync::broadcast;
use tower::ServiceExt;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::proxy::Forwarder;

/// Native backend answering `{status: 0, value: payload}`.
struct EchoChannel {
    state: Mutex<ChannelState>,
    sent: Mutex<Vec<Value>>,
    exit_tx: broadcast::Sender<ExitEvent>,
}

impl EchoChannel {
    fn new() -> Arc<Self> {
        let (exit_tx, _) = broadcast::channel(4);
        Arc::new(Self {
            state: Mutex::new(ChannelState::NotStarted),
            sent: Mutex::new(Vec::new()),
            exit_tx,
        })
    }

    fn sent(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackendChannel for EchoChannel {
    fn kind(&self) -> &str {
        "echo"
    }

    fn state(&self) -> ChannelState {
        *self.state.lock().unwrap()
    }

    async fn start(&self) -> Result<(), ChannelError> {
        *self.state.lock().unwrap() = ChannelState::Ready;
        Ok(())
    }

    async fn send_command(&self, payload: Value) -> Result<Value, ChannelError> {
        self.sent.lock().unwrap().push(payload.clone());
        Ok(json!({"status": 0, "value": payload}))
    }

    fn subscribe_exit(&self) -> broadcast::Receiver<ExitEvent> {
        self.exit_tx.subscribe()
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        *self.state.lock().unwrap() = ChannelState::Stopped;
        Ok(())
    }
}

struct TestApp {
    router: Router,
    channel: Arc<EchoChannel>,
    secondary: MockServer,
}

async fn secondary_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/wd/hub/session"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"sessionId": "remote-1", "status": 0, "value": {}})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/wd/hub/session/remote-1/url"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"sessionId": "remote-1", "status": 0, "value": "about:blank"}),
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/wd/hub/session/remote-1/source"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(1500))
                .set_body_json(json!({"sessionId": "remote-1", "status": 0, "value": "<html/>"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path_regex(r"^/wd/hub/session/[^/]+$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": 0, "value": null})))
        .mount(&server)
        .await;
    server
}

async fn test_app() -> TestApp {
    let secondary = secondary_server().await;
    let channel = EchoChannel::new();

    let mut config = Config::default();
    config.session.webviews = vec!["WEBVIEW_1".to_string()];
    config.session.new_command_timeout_secs = 0;

    let backend = Arc::clone(&channel);
    let factory = SessionFactory::new(Arc::new(config))
        .with_channel_builder(Arc::new(move |_| {
            let channel: Arc<dyn BackendChannel> = backend.clone();
            Ok(channel)
        }))
        .with_launcher(Arc::new(AttachedLauncher::new(
            "127.0.0.1",
            secondary.address().port(),
            "/wd/hub",
        )));
    let registry = Arc::new(SessionRegistry::new(factory));
    let forwarder = Forwarder::new(Duration::from_secs(5)).unwrap();
    let state = Arc::new(AppState::new(registry, forwarder));

    TestApp {
        router: create_router(state, "/wd/hub"),
        channel,
        secondary,
    }
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let body = match body {
        Some(json) => Body::from(json.to_string()),
        None => Body::empty(),
    };
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn create_session(app: &TestApp) -> String {
    let (status, body) = send(
        &app.router,
        "POST",
        "/wd/hub/session",
        Some(json!({"desiredCapabilities": {"platformName": "iOS"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], 0);
    body["sessionId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_status_endpoint() {
    let app = test_app().await;
    let (status, body) = send(&app.router, "GET", "/wd/hub/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], 0);
    assert_eq!(body["value"]["ready"], true);
}

#[tokio::test]
async fn test_create_and_list_sessions() {
    let app = test_app().await;
    let id = create_session(&app).await;

    let (status, body) = send(&app.router, "GET", "/wd/hub/sessions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"][0]["id"], id.as_str());
    assert_eq!(body["value"][0]["capabilities"]["platformName"], "iOS");
    assert_eq!(body["value"][0]["context"], "NATIVE_APP");

    let (status, body) = send(&app.router, "GET", &format!("/wd/hub/session/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionId"], id.as_str());
    assert_eq!(body["value"]["platformName"], "iOS");
}

#[tokio::test]
async fn test_second_session_is_refused() {
    let app = test_app().await;
    create_session(&app).await;

    let (status, body) = send(&app.router, "POST", "/wd/hub/session", Some(json!({}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], 33);
}

#[tokio::test]
async fn test_bad_capabilities_rejected() {
    let app = test_app().await;
    let (status, _) = send(
        &app.router,
        "POST",
        "/wd/hub/session",
        Some(json!({"desiredCapabilities": "iOS"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_session_is_404() {
    let app = test_app().await;
    let (status, body) = send(&app.router, "GET", "/wd/hub/session/nope/source", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 6);
}

#[tokio::test]
async fn test_native_command_payload() {
    let app = test_app().await;
    let id = create_session(&app).await;

    let uri = format!("/wd/hub/session/{}/element", id);
    let (status, body) = send(
        &app.router,
        "POST",
        &uri,
        Some(json!({"using": "name", "value": "Login"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionId"], id.as_str());
    assert_eq!(body["status"], 0);

    let sent = app.channel.sent();
    let payload = sent.last().unwrap();
    assert_eq!(payload["method"], "POST");
    assert_eq!(payload["path"], "/element");
    assert_eq!(payload["body"]["value"], "Login");
}

#[tokio::test]
async fn test_contexts_and_proxying() {
    let app = test_app().await;
    let id = create_session(&app).await;

    let (_, body) = send(&app.router, "GET", &format!("/wd/hub/session/{}/contexts", id), None).await;
    assert_eq!(body["value"], json!(["NATIVE_APP", "WEBVIEW_1"]));

    let context_uri = format!("/wd/hub/session/{}/context", id);
    let (status, _) = send(&app.router, "POST", &context_uri, Some(json!({"name": "WEBVIEW_1"}))).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app.router, "GET", &context_uri, None).await;
    assert_eq!(body["value"], "WEBVIEW_1");

    let sent_before = app.channel.sent().len();
    let (status, body) = send(&app.router, "GET", &format!("/wd/hub/session/{}/url", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], "about:blank");
    assert_eq!(body["sessionId"], id.as_str());
    assert_eq!(app.channel.sent().len(), sent_before);

    let (status, _) = send(&app.router, "POST", &context_uri, Some(json!({"name": null}))).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(&app.router, "GET", &context_uri, None).await;
    assert_eq!(body["value"], "NATIVE_APP");

    let requests = app.secondary.received_requests().await.unwrap();
    assert!(requests.iter().any(|r| r.url.path() == "/wd/hub/session/remote-1/url"));
}

#[tokio::test]
async fn test_alert_command_runs_while_proxied_request_is_outstanding() {
    let app = test_app().await;
    let id = create_session(&app).await;

    let context_uri = format!("/wd/hub/session/{}/context", id);
    let (status, _) = send(&app.router, "POST", &context_uri, Some(json!({"name": "WEBVIEW_1"}))).await;
    assert_eq!(status, StatusCode::OK);

    let slow = tokio::spawn({
        let router = app.router.clone();
        let uri = format!("/wd/hub/session/{}/source", id);
        async move { send(&router, "GET", &uri, None).await }
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let requests = app.secondary.received_requests().await.unwrap_or_default();
            if requests
                .iter()
                .any(|r| r.url.path() == "/wd/hub/session/remote-1/source")
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("proxied request never reached the secondary");

    let alert_uri = format!("/wd/hub/session/{}/alert_text", id);
    let (status, body) = tokio::time::timeout(
        Duration::from_secs(1),
        send(&app.router, "GET", &alert_uri, None),
    )
    .await
    .expect("alert command was held behind the proxied request");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionId"], id.as_str());
    assert!(!slow.is_finished());

    let payload = app.channel.sent().last().cloned().unwrap();
    assert_eq!(payload["path"], "/alert_text");
    assert_eq!(payload["method"], "GET");

    let (status, body) = slow.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], "<html/>");
}

#[tokio::test]
async fn test_unknown_context() {
    let app = test_app().await;
    let id = create_session(&app).await;

    let uri = format!("/wd/hub/session/{}/context", id);
    let (status, body) = send(&app.router, "POST", &uri, Some(json!({"name": "WEBVIEW_9"}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], 35);
    assert_eq!(body["sessionId"], id.as_str());
}

#[tokio::test]
async fn test_delete_session() {
    let app = test_app().await;
    let id = create_session(&app).await;

    let uri = format!("/wd/hub/session/{}", id);
    let (status, _) = send(&app.router, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app.router, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 6);
}

#[tokio::test]
async fn test_unknown_route() {
    let app = test_app().await;
    let (status, body) = send(&app.router, "GET", "/wd/hub/nothing/here", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 9);
}

#[tokio::test]
async fn test_empty_base_path() {
    let registry = Arc::new(SessionRegistry::new(SessionFactory::new(Arc::new(
        Config::default(),
    ))));
    let state = Arc::new(AppState::new(
        registry,
        Forwarder::new(Duration::from_secs(5)).unwrap(),
    ));
    let router = create_router(state, "/");
    let (status, _) = send(&router, "GET", "/status", None).await;
    assert_eq!(status, StatusCode::OK);
}
