//! Unit tests for `StreamingService` over an in-memory transport.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use context_stream::stream::{EventsPush, ToolCallPush, ToolResponsePush};
use context_stream::transport::Transport;
use context_stream::{AppError, StreamingService};
use serde_json::json;

use super::support::{parsed, wait_for_frames, FakeTransport, JoinReply};

const URL: &str = "wss://agents.example.com/stream";

fn service_over(fake: &Arc<FakeTransport>) -> StreamingService {
    let fake = Arc::clone(fake);
    StreamingService::with_transport_factory(URL, "ctx-1", "token-abc", move |url| {
        assert_eq!(url, URL);
        let transport: Arc<dyn Transport> = fake.clone();
        transport
    })
    .with_call_timeout(Duration::from_millis(200))
}

async fn connected(fake: &Arc<FakeTransport>) -> StreamingService {
    let service = service_over(fake);
    service.connect().await.expect("join acknowledged");
    service
}

// ── Connect ──────────────────────────────────────────────

#[tokio::test]
async fn connect_sends_join_with_context_and_token() {
    let fake = FakeTransport::new(JoinReply::Ack);
    let service = connected(&fake).await;

    assert!(service.is_open());
    assert_eq!(fake.connects(), 1);

    let frames = parsed(fake.sent());
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["method"], "connect_to_context");
    assert_eq!(
        frames[0]["params"],
        json!({ "context_id": "ctx-1", "access_token": "token-abc" })
    );
    assert!(frames[0]["id"].is_string());
}

/// Join params go out with `context_id` ahead of `access_token`.
#[tokio::test]
async fn join_frame_lists_context_before_token() {
    let fake = FakeTransport::new(JoinReply::Ack);
    let _service = connected(&fake).await;

    let raw = fake.sent().lock().unwrap()[0].clone();
    assert!(
        raw.contains(r#""params":{"context_id":"ctx-1","access_token":"token-abc"}"#),
        "{raw}"
    );
}

#[tokio::test]
async fn second_connect_is_rejected() {
    let fake = FakeTransport::new(JoinReply::Ack);
    let service = connected(&fake).await;

    let err = service.connect().await.expect_err("already connected");
    assert_eq!(err, AppError::Transport("already connected".into()));
    assert_eq!(fake.connects(), 1);
}

/// A rejected join surfaces the server's message and closes the socket.
#[tokio::test]
async fn rejected_join_closes_transport() {
    let fake = FakeTransport::new(JoinReply::Reject("token expired".into()));
    let service = service_over(&fake);

    let err = service.connect().await.expect_err("join rejected");

    assert_eq!(
        err,
        AppError::Remote {
            method: "connect_to_context".into(),
            message: "token expired".into()
        }
    );
    assert!(!service.is_open());
    assert!(fake.closes() >= 1);
}

#[tokio::test]
async fn unanswered_join_times_out() {
    let fake = FakeTransport::new(JoinReply::Silent);
    let service = service_over(&fake);

    let err = service.connect().await.expect_err("no ack");

    assert_eq!(
        err,
        AppError::Timeout {
            method: "connect_to_context".into()
        }
    );
    assert!(!service.is_open());
}

#[tokio::test]
async fn transport_failure_leaves_service_reusable() {
    let fake = FakeTransport::failing();
    let service = service_over(&fake);

    let err = service.connect().await.expect_err("refused");
    assert!(matches!(err, AppError::Transport(ref msg) if msg.contains("refused")));

    // The failed session was discarded, so a retry reaches the transport again.
    let _ = service.connect().await;
    assert_eq!(fake.connects(), 2);
}

/// Closing while the join is in flight fails it right away instead of
/// waiting out the call timeout.
#[tokio::test]
async fn close_during_join_cancels_it() {
    let fake = FakeTransport::new(JoinReply::Silent);
    let service = Arc::new(service_over(&fake).with_call_timeout(Duration::from_secs(10)));

    let join = tokio::spawn({
        let service = Arc::clone(&service);
        async move { service.connect().await }
    });
    wait_for_frames(fake.sent(), 1).await;

    let started = Instant::now();
    service.close();

    let err = join.await.expect("join task").expect_err("cancelled");
    assert!(matches!(err, AppError::Transport(_)), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
}

// ── Messages ─────────────────────────────────────────────

#[tokio::test]
async fn add_message_before_connect_fails() {
    let fake = FakeTransport::new(JoinReply::Ack);
    let service = service_over(&fake);

    let err = service.add_message("hello").expect_err("not connected");
    assert_eq!(err, AppError::Transport("not connected".into()));
    assert!(fake.sent().lock().unwrap().is_empty());
}

#[tokio::test]
async fn add_message_is_a_notification() {
    let fake = FakeTransport::new(JoinReply::Ack);
    let service = connected(&fake).await;

    service.add_message("What's the weather?").expect("sent");

    let frames = parsed(fake.sent());
    assert_eq!(
        frames[1],
        json!({ "method": "add_message", "params": { "message": "What's the weather?" } })
    );
}

// ── Pushes ───────────────────────────────────────────────

#[tokio::test]
async fn token_push_reaches_callback() {
    let fake = FakeTransport::new(JoinReply::Ack);
    let service = service_over(&fake);
    let tokens = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&tokens);
    service.set_on_token(move |push| {
        sink.lock()
            .unwrap()
            .push((push.token.clone(), push.response_id.clone()));
    });
    service.connect().await.expect("connected");

    fake.push(&json!({ "method": "on_token", "params": { "token": "Hi", "responseId": "r1" } }));

    assert_eq!(
        *tokens.lock().unwrap(),
        vec![("Hi".to_owned(), Some("r1".to_owned()))]
    );
}

#[tokio::test]
async fn tokens_are_delivered_in_arrival_order() {
    let fake = FakeTransport::new(JoinReply::Ack);
    let service = connected(&fake).await;
    let tokens = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&tokens);
    service.set_on_token(move |push| sink.lock().unwrap().push_str(&push.token));

    for token in ["The", " sky", " is", " blue"] {
        fake.push(&json!({ "method": "on_token", "params": { "token": token } }));
    }

    assert_eq!(*tokens.lock().unwrap(), "The sky is blue");
}

#[tokio::test]
async fn tool_and_event_pushes_reach_their_callbacks() {
    let fake = FakeTransport::new(JoinReply::Ack);
    let service = connected(&fake).await;

    let calls = Arc::new(Mutex::new(Vec::<ToolCallPush>::new()));
    let responses = Arc::new(Mutex::new(Vec::<ToolResponsePush>::new()));
    let events = Arc::new(Mutex::new(Vec::<EventsPush>::new()));
    {
        let calls = Arc::clone(&calls);
        service.set_on_tool_call(move |push| calls.lock().unwrap().push(push.clone()));
        let responses = Arc::clone(&responses);
        service.set_on_tool_response(move |push| responses.lock().unwrap().push(push.clone()));
        let events = Arc::clone(&events);
        service.set_on_events(move |push| events.lock().unwrap().push(push.clone()));
    }

    fake.push(&json!({
        "method": "on_tool_call",
        "params": { "id": "t1", "name": "weather", "input": { "city": "Oslo" } }
    }));
    fake.push(&json!({
        "method": "on_tool_response",
        "params": { "id": "t1", "name": "weather", "output": "rain" }
    }));
    fake.push(&json!({
        "method": "on_events",
        "params": { "events": [{ "kind": "step" }, { "kind": "done" }], "responseId": "r9" }
    }));

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "weather");
    assert_eq!(calls[0].input, json!({ "city": "Oslo" }));

    let responses = responses.lock().unwrap();
    assert_eq!(responses[0].id, "t1");
    assert_eq!(responses[0].output, json!("rain"));

    let events = events.lock().unwrap();
    assert_eq!(events[0].events.len(), 2);
    assert_eq!(events[0].response_id.as_deref(), Some("r9"));
}

#[tokio::test]
async fn replacing_a_callback_keeps_only_the_latest() {
    let fake = FakeTransport::new(JoinReply::Ack);
    let service = connected(&fake).await;
    let hits = Arc::new(Mutex::new(Vec::new()));

    let first = Arc::clone(&hits);
    service.set_on_token(move |_push| first.lock().unwrap().push("first"));
    let second = Arc::clone(&hits);
    service.set_on_token(move |_push| second.lock().unwrap().push("second"));

    fake.push(&json!({ "method": "on_token", "params": { "token": "x" } }));

    assert_eq!(*hits.lock().unwrap(), vec!["second"]);
}

#[tokio::test]
async fn pushes_without_callbacks_are_ignored() {
    let fake = FakeTransport::new(JoinReply::Ack);
    let service = connected(&fake).await;

    fake.push(&json!({ "method": "on_token", "params": { "token": "lost" } }));
    fake.push(&json!({ "method": "on_unknown", "params": {} }));

    assert!(service.is_open());
}

/// A push carrying an id is acknowledged with an empty result.
#[tokio::test]
async fn correlated_push_is_acknowledged() {
    let fake = FakeTransport::new(JoinReply::Ack);
    let _service = connected(&fake).await;

    fake.push(&json!({
        "method": "on_tool_call",
        "params": { "id": "t2", "name": "search", "input": {} },
        "id": "srv-7"
    }));

    let frames = wait_for_frames(fake.sent(), 2).await;
    assert_eq!(frames[1], json!({ "id": "srv-7", "result": {} }));
}

// ── Close ────────────────────────────────────────────────

#[tokio::test]
async fn close_is_idempotent() {
    let fake = FakeTransport::new(JoinReply::Ack);
    let service = connected(&fake).await;

    service.close();
    service.close();

    assert!(!service.is_open());
}

/// `closed` stays pending while the socket is up and resolves once the
/// transport reports the close.
#[tokio::test]
async fn closed_resolves_when_transport_closes() {
    let fake = FakeTransport::new(JoinReply::Ack);
    let service = connected(&fake).await;

    let still_open = tokio::time::timeout(Duration::from_millis(50), service.closed()).await;
    assert!(still_open.is_err(), "closed() must wait while the socket is open");

    fake.close();

    tokio::time::timeout(Duration::from_secs(1), service.closed())
        .await
        .expect("closed() resolves after the transport closes");
    assert!(!service.is_open());
}

#[tokio::test]
async fn closed_without_session_resolves_immediately() {
    let fake = FakeTransport::new(JoinReply::Ack);
    let service = service_over(&fake);

    tokio::time::timeout(Duration::from_millis(100), service.closed())
        .await
        .expect("no session to wait on");
}

#[test]
fn close_without_session_is_a_no_op() {
    let fake = FakeTransport::new(JoinReply::Ack);
    let service = service_over(&fake);

    service.close();

    assert!(!service.is_open());
    assert_eq!(fake.closes(), 0);
    assert_eq!(service.context_id(), "ctx-1");
}
