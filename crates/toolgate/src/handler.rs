//! HTTP request routing: auth gate, session resolution, engine dispatch.
//!
//! One endpoint carries the whole session protocol:
//!
//! | Method   | Effect                                               |
//! |----------|------------------------------------------------------|
//! | `POST`   | submit one request (initialize, call, list, ...)     |
//! | `GET`    | open a server-sent event stream of notifications     |
//! | `DELETE` | terminate the session                                |
//!
//! All three sit behind the auth middleware. `GET /health` does not.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::extract::rejection::QueryRejection;
use axum::http::{HeaderMap, HeaderValue, header};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{self, Stream};
use serde_json::{Value, json};
use tokio::sync::broadcast::{self, error::RecvError};
use toolgate_engine::ToolBackend;
use toolgate_protocol::{
    Codec, JsonCodec, Notification, ProtocolError, RequestEnvelope,
    ResponseEnvelope, SessionId,
};
use toolgate_session::{
    Authenticator, Resolution, Session, SessionController, SessionError,
    presented_credential,
};
use toolgate_transport::RequestId;

use crate::ToolgateError;

/// Header carrying the session id, in both directions.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Shared state handed to every handler.
pub(crate) struct AppState<B: ToolBackend, A: Authenticator> {
    pub(crate) controller: Arc<SessionController<B>>,
    pub(crate) auth: Arc<A>,
    pub(crate) keep_alive: Duration,
}

// Derived `Clone` would demand `B: Clone + A: Clone`.
impl<B: ToolBackend, A: Authenticator> Clone for AppState<B, A> {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
            auth: Arc::clone(&self.auth),
            keep_alive: self.keep_alive,
        }
    }
}

/// Builds the router: the gated session endpoint plus `/health`.
pub(crate) fn router<B, A>(state: AppState<B, A>, endpoint: &str) -> Router
where
    B: ToolBackend,
    A: Authenticator,
{
    let gated = Router::new()
        .route(
            endpoint,
            post(handle_post::<B, A>)
                .get(handle_stream::<B, A>)
                .delete(handle_delete::<B, A>),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_auth::<B, A>,
        ));

    Router::new()
        .route("/health", get(health::<B, A>))
        .merge(gated)
        .with_state(state)
}

// =========================================================================
// Auth gate
// =========================================================================

/// Rejects the request with 401 unless the authenticator admits it.
///
/// The query string is read as raw pairs, so a malformed or repeated
/// parameter never fails the request here; the first `token` wins.
async fn require_auth<B: ToolBackend, A: Authenticator>(
    State(state): State<AppState<B, A>>,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
    request: Request,
    next: Next,
) -> Response {
    let query_token = query.ok().and_then(|Query(pairs)| {
        pairs
            .into_iter()
            .find_map(|(key, value)| (key == "token").then_some(value))
    });
    let credential = {
        let authorization = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        presented_credential(authorization, query_token.as_deref()).map(str::to_owned)
    };

    match state.auth.authenticate(credential.as_deref()).await {
        Ok(()) => next.run(request).await,
        Err(e) => {
            let request_id = request
                .extensions()
                .get::<RequestId>()
                .map_or_else(|| "-".to_string(), ToString::to_string);
            tracing::info!(
                %request_id,
                method = %request.method(),
                error = %e,
                "request rejected by auth gate"
            );
            ToolgateError::from(e).into_response()
        }
    }
}

// =========================================================================
// POST: one request
// =========================================================================

async fn handle_post<B: ToolBackend, A: Authenticator>(
    State(state): State<AppState<B, A>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ToolgateError> {
    let request: RequestEnvelope = JsonCodec.decode(&body)?;
    let session_id = header_str(&headers, SESSION_HEADER);
    let host = header_str(&headers, header::HOST.as_str());

    match state.controller.resolve(session_id, host, &request).await? {
        Resolution::Created { session, handshake } => {
            let result = serde_json::to_value(&handshake).map_err(ProtocolError::Encode)?;
            let mut response = encode(&ResponseEnvelope::result(request.id, result))?;
            match HeaderValue::from_str(session.id().as_str()) {
                Ok(value) => {
                    response.headers_mut().insert(SESSION_HEADER, value);
                }
                Err(e) => {
                    tracing::warn!(session_id = %session.id(), error = %e, "session id is not a valid header value");
                }
            }
            Ok(response)
        }
        Resolution::Resumed(session) => {
            tracing::debug!(
                session_id = %session.id(),
                method = request.message.method(),
                "dispatching request"
            );
            let response = {
                let _in_flight = session.begin_request();
                session.engine().dispatch(request).await?
            };
            encode(&response)
        }
    }
}

fn encode(value: &impl serde::Serialize) -> Result<Response, ToolgateError> {
    let body = JsonCodec.encode(value)?;
    Ok(([(header::CONTENT_TYPE, JsonCodec::CONTENT_TYPE)], body).into_response())
}

// =========================================================================
// GET: push stream
// =========================================================================

async fn handle_stream<B: ToolBackend, A: Authenticator>(
    State(state): State<AppState<B, A>>,
    headers: HeaderMap,
) -> Result<Response, ToolgateError> {
    let id = require_session_id(&headers)?;
    let session = state.controller.session(&id).await?;
    let notifications = session.engine().subscribe().await?;
    tracing::info!(session_id = %id, "push stream opened");

    let guard = StreamGuard::new(session, Arc::clone(&state.controller));
    let sse = Sse::new(notification_stream(notifications, guard));
    // A zero interval turns keep-alives off.
    if state.keep_alive.is_zero() {
        Ok(sse.into_response())
    } else {
        Ok(sse
            .keep_alive(KeepAlive::new().interval(state.keep_alive))
            .into_response())
    }
}

/// Drop guard tying a session's life to its push streams.
///
/// When the client goes away axum drops the stream, and with it this
/// guard. Once the last open stream of a session is gone the session is
/// closed. Since `Drop` is synchronous, the close runs in a spawned task.
struct StreamGuard<B: ToolBackend> {
    session: Arc<Session>,
    controller: Arc<SessionController<B>>,
}

impl<B: ToolBackend> StreamGuard<B> {
    fn new(session: Arc<Session>, controller: Arc<SessionController<B>>) -> Self {
        session.stream_opened();
        Self {
            session,
            controller,
        }
    }
}

impl<B: ToolBackend> Drop for StreamGuard<B> {
    fn drop(&mut self) {
        let remaining = self.session.stream_closed();
        let id = self.session.id().clone();
        tracing::debug!(session_id = %id, remaining, "push stream closed");
        if remaining > 0 {
            return;
        }

        let controller = Arc::clone(&self.controller);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                controller.disconnect(&id).await;
            });
        }
    }
}

/// Turns the engine's notification channel into SSE events.
///
/// Ends when the engine stops and the channel closes.
fn notification_stream<B: ToolBackend>(
    receiver: broadcast::Receiver<Notification>,
    guard: StreamGuard<B>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold((receiver, guard), |(mut receiver, guard)| async move {
        loop {
            match receiver.recv().await {
                Ok(notification) => {
                    match Event::default()
                        .event(notification.name())
                        .json_data(&notification)
                    {
                        Ok(event) => return Some((Ok(event), (receiver, guard))),
                        Err(e) => {
                            tracing::warn!(error = %e, "dropping unencodable notification");
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        session_id = %guard.session.id(),
                        skipped,
                        "push stream lagging, notifications dropped"
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

// =========================================================================
// DELETE: terminate
// =========================================================================

async fn handle_delete<B: ToolBackend, A: Authenticator>(
    State(state): State<AppState<B, A>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ToolgateError> {
    let id = require_session_id(&headers)?;
    state.controller.terminate(&id).await?;
    Ok(Json(json!({ "terminated": id })))
}

// =========================================================================
// Health
// =========================================================================

async fn health<B: ToolBackend, A: Authenticator>(
    State(state): State<AppState<B, A>>,
) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sessions": state.controller.session_count().await,
    }))
}

// -- Helpers --------------------------------------------------------------

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn require_session_id(headers: &HeaderMap) -> Result<SessionId, SessionError> {
    header_str(headers, SESSION_HEADER)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(SessionId::new)
        .ok_or(SessionError::MissingSession)
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! In-process router tests: requests go straight into the `Router`
    //! through `tower::ServiceExt::oneshot`, with no socket involved.

    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use tower::ServiceExt;
    use toolgate_engine::ToolError;
    use toolgate_protocol::ToolDescriptor;
    use toolgate_session::{SessionConfig, SharedSecret};

    use super::*;

    struct Echo;

    impl ToolBackend for Echo {
        fn list_tools(&self) -> Vec<ToolDescriptor> {
            vec![ToolDescriptor {
                name: "echo".into(),
                description: "Returns its arguments".into(),
                input_schema: json!({"type": "object"}),
            }]
        }

        async fn execute(&self, tool: &str, arguments: Value) -> Result<Value, ToolError> {
            match tool {
                "echo" => Ok(arguments),
                other => Err(ToolError::UnknownTool(other.to_string())),
            }
        }
    }

    // -- Helpers ----------------------------------------------------------

    fn app(secret: Option<&str>) -> (Router, Arc<SessionController<Echo>>) {
        app_with_keep_alive(secret, Duration::from_secs(15))
    }

    fn app_with_keep_alive(
        secret: Option<&str>,
        keep_alive: Duration,
    ) -> (Router, Arc<SessionController<Echo>>) {
        let controller = SessionController::new(
            SessionConfig {
                idle_timeout_secs: 0,
                ..SessionConfig::default()
            },
            Arc::new(Echo),
        );
        let state = AppState {
            controller: Arc::clone(&controller),
            auth: Arc::new(SharedSecret::new(secret.map(str::to_string))),
            keep_alive,
        };
        (router(state, "/mcp"), controller)
    }

    fn post_builder() -> axum::http::request::Builder {
        Request::builder()
            .method(Method::POST)
            .uri("/mcp")
            .header(header::HOST, "localhost:8080")
            .header(header::CONTENT_TYPE, "application/json")
    }

    fn post(body: &str, session: Option<&str>) -> Request<Body> {
        let mut builder = post_builder();
        if let Some(id) = session {
            builder = builder.header(SESSION_HEADER, id);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn stream_request(id: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri("/mcp")
            .header(SESSION_HEADER, id)
            .body(Body::empty())
            .unwrap()
    }

    /// Initializes a session and returns its id.
    async fn initialize(app: &Router) -> String {
        let response = app
            .clone()
            .oneshot(post(r#"{"id":1,"method":"initialize"}"#, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        response.headers()[SESSION_HEADER].to_str().unwrap().to_string()
    }

    // =====================================================================
    // POST
    // =====================================================================

    #[tokio::test]
    async fn test_post_initialize_returns_session_header_and_handshake() {
        let (app, controller) = app(None);

        let response = app
            .clone()
            .oneshot(post(r#"{"id":1,"method":"initialize","client":"t"}"#, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let id = response.headers()[SESSION_HEADER].to_str().unwrap().to_string();
        assert_eq!(id.len(), 32);
        let body = body_json(response).await;
        assert_eq!(body["id"], 1);
        assert_eq!(body["result"]["server_name"], "toolgate");
        assert_eq!(controller.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_post_call_with_session_routes_to_engine() {
        let (app, _) = app(None);
        let id = initialize(&app).await;

        let response = app
            .clone()
            .oneshot(post(
                r#"{"id":2,"method":"call","tool":"echo","arguments":{"a":1}}"#,
                Some(&id),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(SESSION_HEADER).is_none());
        assert_eq!(body_json(response).await, json!({"id": 2, "result": {"a": 1}}));
    }

    #[tokio::test]
    async fn test_post_unknown_tool_is_200_with_error_payload() {
        let (app, _) = app(None);
        let id = initialize(&app).await;

        let response = app
            .clone()
            .oneshot(post(r#"{"method":"call","tool":"nope"}"#, Some(&id)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["error"]["code"], "unknown_tool");
    }

    #[tokio::test]
    async fn test_post_call_without_session_is_bad_session() {
        let (app, controller) = app(None);

        let response = app
            .clone()
            .oneshot(post(r#"{"method":"call","tool":"echo"}"#, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "bad_session");
        assert_eq!(controller.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_post_unknown_session_is_bad_session_and_creates_nothing() {
        let (app, controller) = app(None);

        let response = app
            .clone()
            .oneshot(post(r#"{"method":"ping"}"#, Some("does-not-exist")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "bad_session");
        assert_eq!(controller.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_post_malformed_json_is_bad_request() {
        let (app, _) = app(None);

        let response = app.clone().oneshot(post("{not json", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_post_initialize_from_foreign_host_is_forbidden() {
        let (app, controller) = app(None);
        let request = Request::builder()
            .method(Method::POST)
            .uri("/mcp")
            .header(header::HOST, "evil.example")
            .body(Body::from(r#"{"method":"initialize"}"#))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(response).await["error"]["code"], "host_not_allowed");
        assert_eq!(controller.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_post_after_shutdown_is_service_unavailable() {
        let (app, controller) = app(None);
        controller.shutdown().await;

        let response = app
            .clone()
            .oneshot(post(r#"{"method":"initialize"}"#, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    // =====================================================================
    // Auth gate
    // =====================================================================

    #[tokio::test]
    async fn test_auth_missing_credential_is_unauthorized_before_session_work() {
        let (app, controller) = app(Some("s3cret"));

        let response = app
            .clone()
            .oneshot(post(r#"{"method":"initialize"}"#, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"]["code"], "unauthorized");
        assert_eq!(controller.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_auth_bearer_header_admits() {
        let (app, _) = app(Some("s3cret"));
        let request = post_builder()
            .header(header::AUTHORIZATION, "Bearer s3cret")
            .body(Body::from(r#"{"method":"initialize"}"#))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_auth_query_token_admits_and_header_takes_precedence() {
        let (app, _) = app(Some("s3cret"));

        let by_query = Request::builder()
            .method(Method::POST)
            .uri("/mcp?token=s3cret")
            .header(header::HOST, "localhost")
            .body(Body::from(r#"{"method":"initialize"}"#))
            .unwrap();
        assert_eq!(app.clone().oneshot(by_query).await.unwrap().status(), StatusCode::OK);

        let wrong_header = Request::builder()
            .method(Method::POST)
            .uri("/mcp?token=s3cret")
            .header(header::HOST, "localhost")
            .header(header::AUTHORIZATION, "Bearer wrong")
            .body(Body::from(r#"{"method":"initialize"}"#))
            .unwrap();
        assert_eq!(
            app.clone().oneshot(wrong_header).await.unwrap().status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_auth_disabled_ignores_unparsable_query() {
        let (app, _) = app(None);
        let request = Request::builder()
            .method(Method::POST)
            .uri("/mcp?token=a&token=b")
            .header(header::HOST, "localhost")
            .body(Body::from(r#"{"method":"initialize"}"#))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_auth_repeated_query_token_uses_first_value() {
        let (app, _) = app(Some("s3cret"));

        let first_right = Request::builder()
            .method(Method::POST)
            .uri("/mcp?token=s3cret&token=other")
            .header(header::HOST, "localhost")
            .body(Body::from(r#"{"method":"initialize"}"#))
            .unwrap();
        assert_eq!(app.clone().oneshot(first_right).await.unwrap().status(), StatusCode::OK);

        let first_wrong = Request::builder()
            .method(Method::POST)
            .uri("/mcp?token=other&token=s3cret")
            .header(header::HOST, "localhost")
            .body(Body::from(r#"{"method":"initialize"}"#))
            .unwrap();
        let response = app.clone().oneshot(first_wrong).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"]["code"], "unauthorized");
    }

    #[tokio::test]
    async fn test_auth_gates_delete_and_stream() {
        let (app, _) = app(Some("s3cret"));
        for method in [Method::GET, Method::DELETE] {
            let request = Request::builder()
                .method(method.clone())
                .uri("/mcp")
                .header(SESSION_HEADER, "whatever")
                .body(Body::empty())
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{method}");
        }
    }

    // =====================================================================
    // DELETE / GET / health
    // =====================================================================

    #[tokio::test]
    async fn test_delete_terminates_then_reuse_is_bad_session() {
        let (app, controller) = app(None);
        let id = initialize(&app).await;

        let delete = Request::builder()
            .method(Method::DELETE)
            .uri("/mcp")
            .header(SESSION_HEADER, &id)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(delete).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"terminated": id}));
        assert_eq!(controller.session_count().await, 0);

        let response = app
            .clone()
            .oneshot(post(r#"{"method":"ping"}"#, Some(&id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_without_session_header_is_bad_session() {
        let (app, _) = app(None);
        let delete = Request::builder()
            .method(Method::DELETE)
            .uri("/mcp")
            .body(Body::empty())
            .unwrap();

        let response = app.clone().oneshot(delete).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stream_unknown_session_is_bad_session() {
        let (app, _) = app(None);
        let request = Request::builder()
            .method(Method::GET)
            .uri("/mcp")
            .header(SESSION_HEADER, "does-not-exist")
            .body(Body::empty())
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stream_known_session_is_event_stream() {
        let (app, _) = app(None);
        let id = initialize(&app).await;
        let request = Request::builder()
            .method(Method::GET)
            .uri("/mcp")
            .header(SESSION_HEADER, &id)
            .body(Body::empty())
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
    }

    #[tokio::test]
    async fn test_stream_with_keep_alive_disabled_is_event_stream() {
        let (app, _) = app_with_keep_alive(None, Duration::ZERO);
        let id = initialize(&app).await;

        let response = app.clone().oneshot(stream_request(&id)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
    }

    #[tokio::test]
    async fn test_stream_session_survives_until_last_stream_drops() {
        let (app, controller) = app(None);
        let id = initialize(&app).await;
        let session = controller.session(&SessionId::new(&id)).await.unwrap();

        let first = app.clone().oneshot(stream_request(&id)).await.unwrap();
        let second = app.clone().oneshot(stream_request(&id)).await.unwrap();
        assert_eq!(session.open_streams(), 2);

        drop(first);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.open_streams(), 1);
        assert_eq!(controller.session_count().await, 1);

        drop(second);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(controller.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_health_counts_sessions() {
        let (app, _) = app(None);
        initialize(&app).await;

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "ok", "sessions": 1}));
    }

    #[tokio::test]
    async fn test_health_bypasses_auth() {
        let (app, _) = app(Some("s3cret"));

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
