//! End-to-end tests for the chat core: real transport against an in-process
//! WebSocket server, HTTP endpoints served by wiremock.

use futures_util::{SinkExt, StreamExt};
use news_chat_client::{
    ChatCore, ChatMessage, ChatOptions, HttpSessionApi, SessionApi, TransportOptions,
    LEGACY_PLACEHOLDER,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn options() -> ChatOptions {
    ChatOptions {
        safety_timeout: Duration::from_secs(5),
        transport: TransportOptions {
            reconnect_delay: Duration::from_millis(50),
            send_retry_delay: Duration::from_millis(100),
        },
        ..ChatOptions::default()
    }
}

/// Server that answers every `user_message` with the given frames.
async fn spawn_stream_server(frames: Vec<&'static str>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        let (mut write, mut read) = ws.split();
        write
            .send(Message::Text(r#"{"type":"init"}"#.into()))
            .await
            .unwrap();
        while let Some(Ok(message)) = read.next().await {
            if !message.is_text() {
                continue;
            }
            for frame in &frames {
                write.send(Message::Text((*frame).into())).await.unwrap();
            }
        }
    });
    format!("ws://127.0.0.1:{}", port)
}

async fn wait_idle(core: &ChatCore) {
    let mut revisions = core.subscribe();
    tokio::time::timeout(Duration::from_secs(10), async {
        while core.status().loading {
            revisions.changed().await.unwrap();
        }
    })
    .await
    .expect("turn did not finish");
}

async fn empty_history_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"history": []})))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn streamed_answer_is_assembled_in_order() {
    let http = empty_history_server().await;
    let ws_url = spawn_stream_server(vec![
        r#"{"type":"assistant_chunk","content":"Hi"}"#,
        r#"{"type":"assistant_chunk","content":" there"}"#,
        r#"{"type":"assistant_done"}"#,
    ])
    .await;

    let api: Arc<dyn SessionApi> = Arc::new(HttpSessionApi::new(http.uri()));
    let core = ChatCore::connect("s-1", api, &ws_url, options()).await;
    assert!(core.messages().is_empty());

    core.submit("Hello").await.unwrap();
    assert!(core.status().loading);
    wait_idle(&core).await;

    assert_eq!(
        core.messages(),
        vec![ChatMessage::user("Hello"), ChatMessage::assistant("Hi there")]
    );
    let status = core.status();
    assert!(!status.loading && !status.streaming);
    assert!(status.connected);
}

#[tokio::test]
async fn protocol_error_returns_to_idle_without_log_entry() {
    let http = empty_history_server().await;
    let ws_url =
        spawn_stream_server(vec![r#"{"type":"error","message":"Index not ready"}"#]).await;

    let api: Arc<dyn SessionApi> = Arc::new(HttpSessionApi::new(http.uri()));
    let core = ChatCore::connect("s", api, &ws_url, options()).await;

    core.submit("anything?").await.unwrap();
    wait_idle(&core).await;

    assert_eq!(core.messages(), vec![ChatMessage::user("anything?")]);
    assert_eq!(core.last_error().as_deref(), Some("Index not ready"));
}

#[tokio::test]
async fn unusable_endpoint_answers_through_fallback() {
    let http = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/session/s/history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "history": [{"role": "assistant", "content": LEGACY_PLACEHOLDER}]
        })))
        .mount(&http)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "answer": "X",
            "contexts": []
        })))
        .mount(&http)
        .await;

    let api: Arc<dyn SessionApi> = Arc::new(HttpSessionApi::new(http.uri()));
    let core = ChatCore::connect("s", api, "not-a-websocket-url", options()).await;
    assert!(core.messages().is_empty());
    assert!(!core.status().connected);

    core.submit("Fallback please").await.unwrap();

    assert_eq!(
        core.messages(),
        vec![
            ChatMessage::user("Fallback please"),
            ChatMessage::assistant("X")
        ]
    );
    assert!(!core.status().loading);
}

#[tokio::test]
async fn reset_on_fresh_session_clears_log() {
    let http = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/session/new/history"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&http)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/session/new/reset"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&http)
        .await;

    let api: Arc<dyn SessionApi> = Arc::new(HttpSessionApi::new(http.uri()));
    let core = ChatCore::connect("new", api, "not-a-websocket-url", options()).await;

    core.reset().await.expect("reset should succeed");
    assert!(core.messages().is_empty());
}

#[tokio::test]
async fn unreachable_history_yields_empty_log() {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead = format!("http://127.0.0.1:{}", probe.local_addr().unwrap().port());
    drop(probe);

    let api: Arc<dyn SessionApi> = Arc::new(HttpSessionApi::new(dead));
    let core = ChatCore::connect("s", api, "not-a-websocket-url", options()).await;
    assert!(core.messages().is_empty());
    assert!(!core.status().loading);
}
