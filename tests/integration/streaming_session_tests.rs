//! End-to-end tests for `StreamingService` over a real WebSocket.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use context_stream::rpc::wait_until;
use context_stream::{AppError, StreamingService};
use serde_json::json;

use super::test_helpers::{spawn_context_server, unused_url};

const SETTLE: Duration = Duration::from_secs(2);
const POLL: Duration = Duration::from_millis(10);

fn collect_tokens(service: &StreamingService) -> Arc<Mutex<Vec<String>>> {
    let tokens = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&tokens);
    service.set_on_token(move |push| sink.lock().unwrap().push(push.token.clone()));
    tokens
}

/// Join, receive the streamed greeting, then send a message and receive the
/// reply token.
#[tokio::test]
async fn join_stream_and_reply() {
    let mut server = spawn_context_server().await;
    let service = StreamingService::new(&server.url, "ctx-7", "valid-token");
    let tokens = collect_tokens(&service);

    service.connect().await.expect("join acknowledged");
    assert!(service.is_open());

    let join = server.next_inbound().await;
    assert_eq!(join["method"], "connect_to_context");
    assert_eq!(join["params"]["context_id"], "ctx-7");
    assert_eq!(join["params"]["access_token"], "valid-token");

    assert!(wait_until(|| tokens.lock().unwrap().len() == 2, SETTLE, POLL).await);
    assert_eq!(*tokens.lock().unwrap(), vec!["Hel", "lo"]);

    service.add_message("ping").expect("sent");
    let message = server.next_inbound().await;
    assert_eq!(
        message,
        json!({ "method": "add_message", "params": { "message": "ping" } })
    );

    assert!(wait_until(|| tokens.lock().unwrap().len() == 3, SETTLE, POLL).await);
    assert_eq!(tokens.lock().unwrap()[2], "echo: ping");

    service.close();
    assert!(wait_until(|| !service.is_open(), SETTLE, POLL).await);
}

#[tokio::test]
async fn expired_token_is_rejected_and_socket_closed() {
    let server = spawn_context_server().await;
    let service = StreamingService::new(&server.url, "ctx-7", "expired");

    let err = service.connect().await.expect_err("join rejected");

    assert_eq!(
        err,
        AppError::Remote {
            method: "connect_to_context".into(),
            message: "token expired".into()
        }
    );
    assert!(!service.is_open());
}

#[tokio::test]
async fn unreachable_server_fails_connect() {
    let service = StreamingService::new(unused_url().await, "ctx-7", "valid-token");

    let err = service.connect().await.expect_err("nothing listening");

    assert!(matches!(err, AppError::Transport(_)));
    assert!(!service.is_open());
    assert_eq!(
        service.add_message("hello"),
        Err(AppError::Transport("not connected".into()))
    );
}

/// A server-initiated call carrying an id receives an empty success result.
#[tokio::test]
async fn server_request_is_acknowledged() {
    let mut server = spawn_context_server().await;
    let service = StreamingService::new(&server.url, "ctx-7", "valid-token");
    let names = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&names);
    service.set_on_tool_call(move |push| sink.lock().unwrap().push(push.name.clone()));

    service.connect().await.expect("connected");
    let _join = server.next_inbound().await;

    server.push(&json!({
        "method": "on_tool_call",
        "params": { "id": "t1", "name": "lookup", "input": { "q": "x" } },
        "id": "srv-1"
    }));

    let reply = server.next_inbound().await;
    assert_eq!(reply, json!({ "id": "srv-1", "result": {} }));
    assert_eq!(*names.lock().unwrap(), vec!["lookup"]);
}

#[tokio::test]
async fn server_close_ends_the_session() {
    let mut server = spawn_context_server().await;
    let service = StreamingService::new(&server.url, "ctx-7", "valid-token");
    service.connect().await.expect("connected");
    let _join = server.next_inbound().await;

    server.close();

    tokio::time::timeout(SETTLE, service.closed())
        .await
        .expect("close observed without any outbound traffic");
    assert!(!service.is_open());
    // Frames sent on a closed socket are dropped, not errors.
    assert!(service.add_message("too late").is_ok());
}
