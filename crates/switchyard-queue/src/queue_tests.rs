use super::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use switchyard_protocols::ChannelError;
use tokio::sync::Notify;

use crate::classify::PrefixClassifier;

#[derive(Default)]
struct RecordingExecutor {
    seen: Mutex<Vec<Value>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
    release: Option<Arc<Notify>>,
}

impl RecordingExecutor {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn seen(&self) -> Vec<Value> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute(&self, command: &Command) -> Result<Value, ChannelError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.seen.lock().push(command.payload.clone());

        if let Some(release) = &self.release {
            release.notified().await;
        }
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match command.payload.as_str() {
            Some("die") => Err(ChannelError::DiedMidCommand { code: Some(9) }),
            Some("bad") => Err(ChannelError::Protocol("bad frame".to_string())),
            _ => Ok(json!({"status": 0, "value": command.payload})),
        }
    }
}

fn queue() -> CommandQueue {
    CommandQueue::new(
        QueueOptions {
            backoff: Duration::from_millis(20),
        },
        Arc::new(PrefixClassifier::from_config(
            &switchyard_config::QueueConfig::default(),
        )),
        QueueGates::new(),
    )
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_single_flight_in_acceptance_order() {
    let queue = queue();
    let executor = Arc::new(RecordingExecutor::with_delay(Duration::from_millis(2)));
    queue.start(executor.clone());

    let receivers: Vec<_> = (0..10)
        .map(|i| queue.enqueue(Command::new(json!(i))).unwrap())
        .collect();

    for (i, rx) in receivers.into_iter().enumerate() {
        let value = rx.await.unwrap().unwrap();
        assert_eq!(value["value"], json!(i));
    }

    let expected: Vec<Value> = (0..10).map(|i| json!(i)).collect();
    assert_eq!(executor.seen(), expected);
    assert_eq!(executor.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unblocking_command_passes_remote_gate() {
    let queue = queue();
    let executor = Arc::new(RecordingExecutor::default());
    let remote = queue.gates().begin_remote();

    let tap = queue.enqueue(Command::new(json!("au.tap('1')"))).unwrap();
    let tree = queue.enqueue(Command::new(json!("au.getTree()"))).unwrap();
    let alert = queue
        .enqueue(Command::new(json!("au.alertIsPresent()")))
        .unwrap();
    queue.start(executor.clone());

    alert.await.unwrap().unwrap();
    assert_eq!(executor.seen(), vec![json!("au.alertIsPresent()")]);
    assert_eq!(queue.len(), 2);

    drop(remote);
    tap.await.unwrap().unwrap();
    tree.await.unwrap().unwrap();
    assert_eq!(
        executor.seen(),
        vec![
            json!("au.alertIsPresent()"),
            json!("au.tap('1')"),
            json!("au.getTree()")
        ]
    );
}

#[tokio::test]
async fn test_switch_gate_holds_scoped_commands() {
    let queue = queue();
    let executor = Arc::new(RecordingExecutor::default());
    queue.start(executor.clone());

    let switching = queue.gates().begin_switch();
    let mut rx = queue.enqueue(Command::new(json!("au.getTree()"))).unwrap();

    let early = tokio::time::timeout(Duration::from_millis(60), &mut rx).await;
    assert!(early.is_err());
    assert!(executor.seen().is_empty());

    drop(switching);
    let value = rx.await.unwrap().unwrap();
    assert_eq!(value["status"], 0);
}

#[tokio::test]
async fn test_terminal_error_closes_queue() {
    let queue = queue();
    let executor = Arc::new(RecordingExecutor::default());

    let first = queue.enqueue(Command::new(json!("die"))).unwrap();
    let second = queue.enqueue(Command::new(json!("au.getTree()"))).unwrap();
    queue.start(executor.clone());

    let err = first.await.unwrap().unwrap_err();
    assert!(err.is_terminal());
    assert!(err.to_string().contains("died mid-command"));

    let err = second.await.unwrap().unwrap_err();
    assert!(matches!(err, QueueError::BackendUnavailable(_)));

    assert!(queue.is_closed());
    let err = queue.enqueue(Command::new(json!("late"))).unwrap_err();
    assert!(matches!(err, QueueError::BackendUnavailable(_)));
    assert_eq!(executor.seen(), vec![json!("die")]);
}

#[tokio::test]
async fn test_non_terminal_error_keeps_queue_open() {
    let queue = queue();
    queue.start(Arc::new(RecordingExecutor::default()));

    let err = queue.submit(json!("bad")).await.unwrap_err();
    assert!(matches!(err, QueueError::Channel(ChannelError::Protocol(_))));
    assert!(!queue.is_closed());

    let value = queue.submit(json!("ok")).await.unwrap();
    assert_eq!(value["value"], "ok");
}

#[tokio::test]
async fn test_close_fails_pending_commands() {
    let queue = queue();
    let rx = queue.enqueue(Command::new(json!("never"))).unwrap();

    queue.close("backend exited");

    let err = rx.await.unwrap().unwrap_err();
    assert_eq!(err.to_string(), "Backend unavailable: backend exited");
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_wait_idle_waits_for_in_flight_command() {
    let queue = queue();
    let release = Arc::new(Notify::new());
    let executor = Arc::new(RecordingExecutor {
        release: Some(release.clone()),
        ..Default::default()
    });
    queue.start(executor);

    let rx = queue.enqueue(Command::new(json!("slow"))).unwrap();
    wait_until(|| queue.is_busy()).await;

    let idle = tokio::spawn({
        let queue = queue.clone();
        async move { queue.wait_idle().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!idle.is_finished());

    release.notify_one();
    rx.await.unwrap().unwrap();
    idle.await.unwrap();
    assert!(!queue.is_busy());
}

#[tokio::test]
async fn test_stop_ends_dispatcher() {
    let queue = queue();
    queue.start(Arc::new(RecordingExecutor::default()));
    queue.submit(json!("one")).await.unwrap();

    queue.stop().await;
    assert!(queue.is_closed());
    assert!(queue.submit(json!("two")).await.is_err());
}
