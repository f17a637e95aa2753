//! HTTP request handlers.
//!
//! | Route          | Purpose                                         |
//! |----------------|-------------------------------------------------|
//! | `POST /mcp`    | one protocol envelope in, reply / SSE / 202 out |
//! | `GET /mcp`     | SSE stream of server-initiated messages         |
//! | `DELETE /mcp`  | close the session                               |
//! | `GET /health`  | liveness                                        |
//! | `GET /status`  | sessions, calls, tools                          |

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Json, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::dispatcher::{self, Dispatch, RequestMeta};
use super::state::{AppState, SessionHandle};
use crate::codec;
use crate::engine::{CallEvent, PendingCall};
use crate::error::ErrorKind;
use crate::protocol::{Message, SessionEvent, SessionId, SESSION_HEADER};

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        // Health and status
        .route("/health", get(health_check))
        .route("/status", get(status))
        // Protocol endpoint
        .route("/mcp", get(open_stream).post(post_message).delete(delete_session))
        .layer(DefaultBodyLimit::max(state.config.max_body_size))
        .with_state(Arc::clone(&state));

    if state.config.cors_enabled {
        router = router.layer(CorsLayer::permissive());
    }
    if state.config.logging {
        router = router.layer(TraceLayer::new_for_http());
    }
    router
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    /// Always `"ok"`
    pub status: &'static str,
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Status response
#[derive(Serialize)]
pub struct StatusResponse {
    /// Always `"ok"`
    pub status: &'static str,
    /// Server version
    pub version: &'static str,
    /// Seconds since start
    pub uptime_secs: u64,
    /// Live sessions
    pub active_sessions: usize,
    /// Tool calls in flight
    pub in_flight_calls: usize,
    /// Registered tool names
    pub tools: Vec<String>,
}

/// Status endpoint
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(StatusResponse {
        status: "ok",
        version: crate::VERSION,
        uptime_secs: state.uptime().as_secs(),
        active_sessions: state.sessions.count().await,
        in_flight_calls: state.engine.in_flight_count().await,
        tools: state
            .registry
            .list()
            .map(|tool| tool.name().to_string())
            .collect(),
    })
}

/// Handle one inbound envelope
async fn post_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let access_token = bearer_token(&headers);
    if state.config.require_bearer && access_token.is_none() {
        return error_response(
            StatusCode::UNAUTHORIZED,
            ErrorKind::Unauthorized,
            "missing bearer token",
        );
    }

    let existing = match session_header(&headers) {
        Some(id) => match state.sessions.get(&id).await {
            Some(_) => Some(id),
            None => {
                return error_response(
                    StatusCode::NOT_FOUND,
                    ErrorKind::SessionNotFound,
                    "unknown session",
                )
            },
        },
        None => None,
    };

    let message = match codec::decode(&body) {
        Ok(message) => message,
        Err(err) => {
            tracing::debug!(error = %err, "Rejecting undecodable payload");
            return message_response(
                StatusCode::BAD_REQUEST,
                &err.into_response(),
                existing.as_ref(),
            );
        },
    };

    let session_id = match existing {
        Some(id) => id,
        None => state.sessions.create().await.id().clone(),
    };

    let meta = RequestMeta { access_token };
    match dispatcher::handle(&state, &session_id, message, &meta).await {
        Dispatch::Reply(reply) => {
            message_response(reply_status(&reply), &reply, Some(&session_id))
        },
        Dispatch::NoReply => with_session(StatusCode::ACCEPTED.into_response(), &session_id),
        Dispatch::Pending(pending) if accepts_event_stream(&headers) => {
            with_session(call_stream(pending).into_response(), &session_id)
        },
        Dispatch::Pending(pending) => {
            let id = pending.id().clone();
            match pending.wait().await {
                Some(response) => message_response(StatusCode::OK, &response, Some(&session_id)),
                None => message_response(
                    StatusCode::GONE,
                    &Message::error_kind(
                        Some(id),
                        ErrorKind::SessionClosed,
                        "session closed before the call completed",
                    ),
                    Some(&session_id),
                ),
            }
        },
    }
}

/// Open the session's server-to-client stream.
///
/// Dropping the stream (client disconnect) closes the session.
async fn open_stream(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(handle) = lookup(&state, &headers).await else {
        return error_response(
            StatusCode::NOT_FOUND,
            ErrorKind::SessionNotFound,
            "unknown session",
        );
    };

    let id = handle.id().clone();
    let guard = CloseOnDrop {
        state: Arc::clone(&state),
        id: id.clone(),
    };
    tracing::info!(session = %id, "Session stream opened");

    let events = BroadcastStream::new(handle.subscribe()).filter_map(move |item| {
        let event = match item {
            Ok(message) => Some(Ok::<_, Infallible>(sse_event(&message))),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::debug!(session = %guard.id, skipped, "Session stream lagged");
                None
            },
        };
        async move { event }
    });

    with_session(
        Sse::new(events).keep_alive(KeepAlive::default()).into_response(),
        &id,
    )
}

/// Close the session
async fn delete_session(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(handle) = lookup(&state, &headers).await else {
        return error_response(
            StatusCode::NOT_FOUND,
            ErrorKind::SessionNotFound,
            "unknown session",
        );
    };

    state
        .close_session(handle.id(), SessionEvent::CloseRequested)
        .await;
    StatusCode::NO_CONTENT.into_response()
}

/// SSE stream of a call's progress followed by its response
fn call_stream(pending: PendingCall) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = stream::unfold(pending, |mut pending| async move {
        let message = match pending.next_event().await? {
            CallEvent::Progress(message) | CallEvent::Response(message) => message,
        };
        Some((Ok(sse_event(&message)), pending))
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

fn sse_event(message: &Message) -> Event {
    Event::default()
        .event("message")
        .data(codec::to_value(message).to_string())
}

/// Closes the session when the GET stream goes away
struct CloseOnDrop {
    state: Arc<AppState>,
    id: SessionId,
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let state = Arc::clone(&self.state);
        let id = self.id.clone();
        runtime.spawn(async move {
            if state.close_session(&id, SessionEvent::ConnectionClosed).await {
                tracing::info!(session = %id, "Session stream closed by client");
            }
        });
    }
}

async fn lookup(state: &AppState, headers: &HeaderMap) -> Option<Arc<SessionHandle>> {
    let id = session_header(headers)?;
    state.sessions.get(&id).await
}

fn session_header(headers: &HeaderMap) -> Option<SessionId> {
    let raw = headers.get(SESSION_HEADER)?.to_str().ok()?;
    let id = SessionId::from_client(raw);
    (!id.as_str().is_empty()).then_some(id)
}

/// Extract `Authorization: Bearer <token>`
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.contains("text/event-stream"))
}

fn reply_status(reply: &Message) -> StatusCode {
    match reply.as_response().and_then(|r| r.error()).map(|e| &e.kind) {
        Some(ErrorKind::SessionNotFound) => StatusCode::NOT_FOUND,
        Some(ErrorKind::SessionClosed) => StatusCode::GONE,
        _ => StatusCode::OK,
    }
}

fn message_response(
    status: StatusCode,
    message: &Message,
    session: Option<&SessionId>,
) -> Response {
    let response = (status, Json(codec::to_value(message))).into_response();
    match session {
        Some(id) => with_session(response, id),
        None => response,
    }
}

fn error_response(status: StatusCode, kind: ErrorKind, message: &str) -> Response {
    message_response(status, &Message::error_kind(None, kind, message), None)
}

fn with_session(mut response: Response, id: &SessionId) -> Response {
    if let Ok(value) = HeaderValue::from_str(id.as_str()) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}
