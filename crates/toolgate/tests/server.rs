//! End-to-end tests: a real server on a random port, driven over HTTP.

use std::time::Duration;

use serde_json::{Value, json};
use tokio::task::JoinHandle;
use toolgate::prelude::*;

// =========================================================================
// Test backend and authenticator
// =========================================================================

struct Tools;

impl ToolBackend for Tools {
    fn list_tools(&self) -> Vec<ToolDescriptor> {
        vec![ToolDescriptor {
            name: "x".into(),
            description: "Returns its arguments".into(),
            input_schema: json!({"type": "object"}),
        }]
    }

    async fn execute(&self, tool: &str, arguments: Value) -> Result<Value, ToolError> {
        match tool {
            "x" => Ok(arguments),
            "broken" => Err(ToolError::Failed("malformed downstream payload".into())),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}

/// Admits only the credential `"let-me-in"`.
struct FixedToken;

impl Authenticator for FixedToken {
    async fn authenticate(&self, credential: Option<&str>) -> Result<(), SessionError> {
        match credential {
            Some("let-me-in") => Ok(()),
            _ => Err(SessionError::Unauthorized("wrong token".into())),
        }
    }
}

// =========================================================================
// Helpers
// =========================================================================

struct Running {
    base: String,
    handle: ShutdownHandle,
    task: JoinHandle<Result<(), ToolgateError>>,
}

impl Running {
    fn endpoint(&self) -> String {
        format!("{}/mcp", self.base)
    }
}

async fn start(builder: ToolgateServerBuilder) -> Running {
    let server = builder
        .bind("127.0.0.1:0")
        .build(Tools)
        .await
        .expect("server should build");
    start_built(server).await
}

async fn start_built(server: ToolgateServer) -> Running {
    let addr = server.local_addr().expect("should have local addr");
    let handle = server.shutdown_handle();
    let task = tokio::spawn(server.run());

    // Give the serve loop a moment to start.
    tokio::time::sleep(Duration::from_millis(10)).await;
    Running {
        base: format!("http://{addr}"),
        handle,
        task,
    }
}

async fn start_default() -> Running {
    start(ToolgateServer::builder()).await
}

/// Opens a session and returns its id.
async fn initialize(client: &reqwest::Client, server: &Running) -> String {
    let response = client
        .post(server.endpoint())
        .json(&json!({"method": "initialize"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.headers()[SESSION_HEADER].to_str().unwrap().to_string()
}

async fn call(client: &reqwest::Client, server: &Running, session: &str, body: Value) -> reqwest::Response {
    client
        .post(server.endpoint())
        .header(SESSION_HEADER, session)
        .json(&body)
        .send()
        .await
        .unwrap()
}

async fn session_count(client: &reqwest::Client, server: &Running) -> u64 {
    let health: Value = client
        .get(format!("{}/health", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    health["sessions"].as_u64().unwrap()
}

/// Reads an event stream until `needle` shows up or the stream ends.
async fn read_until(response: &mut reqwest::Response, needle: &str) -> String {
    let mut seen = String::new();
    let read = async {
        while let Some(chunk) = response.chunk().await.unwrap() {
            seen.push_str(&String::from_utf8_lossy(&chunk));
            if seen.contains(needle) {
                break;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .expect("event stream stalled");
    seen
}

// =========================================================================
// Session lifecycle over HTTP
// =========================================================================

#[tokio::test]
async fn test_initialize_returns_new_session_id() {
    let server = start_default().await;
    let client = reqwest::Client::new();

    let s1 = initialize(&client, &server).await;
    let s2 = initialize(&client, &server).await;

    assert_eq!(s1.len(), 32);
    assert_ne!(s1, s2);
    assert_eq!(session_count(&client, &server).await, 2);
}

#[tokio::test]
async fn test_call_with_session_is_routed_to_same_engine() {
    let server = start_default().await;
    let client = reqwest::Client::new();
    let s1 = initialize(&client, &server).await;

    let response = call(&client, &server, &s1, json!({"id": 7, "method": "call", "tool": "x"})).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"id": 7, "result": {}}));

    // The engine behind S1 has already done its handshake.
    let response = call(&client, &server, &s1, json!({"method": "initialize"})).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "already_initialized");
}

#[tokio::test]
async fn test_unknown_session_is_rejected_with_400() {
    let server = start_default().await;
    let client = reqwest::Client::new();

    let response = call(&client, &server, "does-not-exist", json!({"method": "call", "tool": "x"})).await;

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_session");
    assert!(body["error"]["message"].as_str().unwrap().contains("unknown session"));
    assert_eq!(session_count(&client, &server).await, 0);
}

#[tokio::test]
async fn test_secret_configured_stream_without_credential_is_401() {
    let server = start(ToolgateServer::builder().shared_secret("abc")).await;
    let client = reqwest::Client::new();

    let response = client.get(server.endpoint()).send().await.unwrap();
    assert_eq!(response.status(), 401);

    let response = client
        .post(server.endpoint())
        .bearer_auth("abc")
        .json(&json!({"method": "initialize"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_delete_then_reuse_is_400() {
    let server = start_default().await;
    let client = reqwest::Client::new();
    let s1 = initialize(&client, &server).await;

    let response = client
        .delete(server.endpoint())
        .header(SESSION_HEADER, &s1)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"terminated": s1}));

    let response = call(&client, &server, &s1, json!({"method": "ping"})).await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_tool_failure_is_200_and_session_survives() {
    let server = start_default().await;
    let client = reqwest::Client::new();
    let s1 = initialize(&client, &server).await;

    let response = call(&client, &server, &s1, json!({"method": "call", "tool": "broken"})).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "tool_failed");

    let response = call(&client, &server, &s1, json!({"method": "ping"})).await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_close_message_ends_session() {
    let server = start_default().await;
    let client = reqwest::Client::new();
    let s1 = initialize(&client, &server).await;

    let response = call(&client, &server, &s1, json!({"method": "close"})).await;
    assert_eq!(response.status(), 200);

    let response = call(&client, &server, &s1, json!({"method": "ping"})).await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_custom_authenticator_is_used() {
    let server = ToolgateServer::builder()
        .bind("127.0.0.1:0")
        .build_with_auth(Tools, FixedToken)
        .await
        .unwrap();
    let server = start_built(server).await;
    let client = reqwest::Client::new();

    let rejected = client
        .post(server.endpoint())
        .json(&json!({"method": "initialize"}))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), 401);

    let admitted = client
        .post(format!("{}?token=let-me-in", server.endpoint()))
        .json(&json!({"method": "initialize"}))
        .send()
        .await
        .unwrap();
    assert_eq!(admitted.status(), 200);
}

// =========================================================================
// Push stream
// =========================================================================

#[tokio::test]
async fn test_stream_delivers_tool_notifications() {
    let server = start_default().await;
    let client = reqwest::Client::new();
    let s1 = initialize(&client, &server).await;

    let mut stream = client
        .get(server.endpoint())
        .header(SESSION_HEADER, &s1)
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status(), 200);

    let response = call(&client, &server, &s1, json!({"method": "call", "tool": "x"})).await;
    assert_eq!(response.status(), 200);

    let seen = read_until(&mut stream, "tool_completed").await;
    assert!(seen.contains("event: tool_completed"), "{seen}");
}

#[tokio::test]
async fn test_dropping_stream_closes_session() {
    // Frequent keep-alives make the server notice the closed socket fast.
    let server = start(ToolgateServer::builder().sse_keep_alive(Duration::from_millis(50))).await;
    let client = reqwest::Client::new();
    let s1 = initialize(&client, &server).await;

    let stream = client
        .get(server.endpoint())
        .header(SESSION_HEADER, &s1)
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status(), 200);
    drop(stream);

    let mut remaining = 1;
    for _ in 0..200 {
        remaining = session_count(&client, &server).await;
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(remaining, 0);
}

// =========================================================================
// Startup and shutdown
// =========================================================================

#[tokio::test]
async fn test_bind_taken_port_fails_with_transport_error() {
    let first = ToolgateServer::builder()
        .bind("127.0.0.1:0")
        .build(Tools)
        .await
        .unwrap();
    let addr = first.local_addr().unwrap().to_string();

    let second = ToolgateServer::builder().bind(&addr).build(Tools).await;
    assert!(matches!(second, Err(ToolgateError::Transport(_))));
}

#[tokio::test]
async fn test_shutdown_closes_sessions_and_ends_streams() {
    let server = start_default().await;
    let endpoint = server.endpoint();
    let client = reqwest::Client::new();
    let s1 = initialize(&client, &server).await;
    initialize(&client, &server).await;

    let mut stream = client
        .get(&endpoint)
        .header(SESSION_HEADER, &s1)
        .send()
        .await
        .unwrap();

    server.handle.shutdown();

    let seen = read_until(&mut stream, "session_closed").await;
    assert!(seen.contains("server shutdown"), "{seen}");

    let result = tokio::time::timeout(Duration::from_secs(5), server.task)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok());

    let refused = client
        .post(&endpoint)
        .json(&json!({"method": "initialize"}))
        .send()
        .await;
    assert!(refused.is_err());
}
