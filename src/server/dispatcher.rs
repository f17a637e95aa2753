//! Message routing.
//!
//! Each decoded message is routed under its session's lock, so messages of
//! one session are handled strictly in receipt order. Tool calls leave the
//! lock as soon as they are submitted; their responses arrive through the
//! returned [`PendingCall`] in completion order.
//!
//! | Session state           | Message                         | Outcome                        |
//! |-------------------------|---------------------------------|--------------------------------|
//! | `Created`               | `initialize`                    | handshake, `Ready`             |
//! | `Created`/`Negotiating` | anything else                   | `ProtocolSequenceError`, close |
//! | `Ready`                 | `initialize`                    | `ProtocolSequenceError`, close |
//! | `Ready`                 | `ping`, `tools/list`            | reply                          |
//! | `Ready`                 | `tools/call`                    | pending call                   |
//! | `Ready`                 | `notifications/cancelled`       | cancel, no reply               |
//! | any open                | `session/close`                 | close, no reply                |
//! | `Closing`/`Closed`      | request                         | `SessionClosed`                |

use std::sync::Arc;

use serde_json::{json, Value};

use super::state::{apply_logged, AppState, SessionHandle};
use crate::engine::{CallOptions, PendingCall};
use crate::error::{ErrorKind, McpError};
use crate::protocol::{
    methods, Capabilities, CorrelationId, ErrorObject, Implementation, InitializeParams,
    InitializeResult, Message, Notification, Request, Session, SessionEvent, SessionId,
    SessionState,
};

/// What the transport should do with a dispatched message
#[derive(Debug)]
pub enum Dispatch {
    /// Answer immediately
    Reply(Message),
    /// A tool call is running; its response arrives later
    Pending(PendingCall),
    /// Nothing to send back
    NoReply,
}

impl Dispatch {
    /// The immediate reply, if any
    pub fn reply(&self) -> Option<&Message> {
        match self {
            Self::Reply(message) => Some(message),
            _ => None,
        }
    }
}

/// Transport-level facts about the inbound message
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    /// Bearer token from the `Authorization` header
    pub access_token: Option<String>,
}

/// Route one message for a session
pub async fn handle(
    state: &Arc<AppState>,
    session_id: &SessionId,
    message: Message,
    meta: &RequestMeta,
) -> Dispatch {
    let Some(handle) = state.sessions.get(session_id).await else {
        return match message.id() {
            Some(id) => Dispatch::Reply(Message::error_kind(
                Some(id.clone()),
                ErrorKind::SessionNotFound,
                "unknown session",
            )),
            None => Dispatch::NoReply,
        };
    };

    let mut session = handle.lock().await;
    session.record_message();

    let mut router = Router {
        state,
        handle: &handle,
        session: &mut *session,
        meta,
        close: false,
    };
    let dispatch = router.route(message).await;
    let close = router.close;
    drop(session);

    if close {
        let state = Arc::clone(state);
        let id = session_id.clone();
        tokio::spawn(async move { state.finish_close(&id).await });
    }

    dispatch
}

struct Router<'a> {
    state: &'a Arc<AppState>,
    handle: &'a SessionHandle,
    session: &'a mut Session,
    meta: &'a RequestMeta,
    close: bool,
}

impl Router<'_> {
    async fn route(&mut self, message: Message) -> Dispatch {
        let state = self.session.state();

        let message = match message {
            Message::Response(response) => {
                tracing::debug!(
                    session = %self.handle.id(),
                    id = ?response.id,
                    "Ignoring inbound response"
                );
                return Dispatch::NoReply;
            },
            other => other,
        };

        if state.is_closing() {
            return match message.id() {
                Some(id) => Dispatch::Reply(Message::error_kind(
                    Some(id.clone()),
                    ErrorKind::SessionClosed,
                    "session is closing",
                )),
                None => Dispatch::NoReply,
            };
        }

        match message {
            Message::Notification(note) => self.route_notification(state, note).await,
            Message::Request(req) => self.route_request(state, req).await,
            Message::Response(_) => Dispatch::NoReply,
        }
    }

    async fn route_notification(&mut self, state: SessionState, note: Notification) -> Dispatch {
        let method = note.method.clone();
        match (state, method.as_str()) {
            (_, methods::SESSION_CLOSE) => {
                self.transition(SessionEvent::CloseRequested);
                Dispatch::NoReply
            },
            (_, methods::INITIALIZED) => Dispatch::NoReply,
            (SessionState::Ready, methods::CANCELLED) => {
                match cancel_target(note.params.as_ref()) {
                    Some(id) => {
                        self.state.engine.cancel(self.handle.id(), &id).await;
                    },
                    None => {
                        tracing::debug!(session = %self.handle.id(), "Cancel without requestId")
                    },
                }
                Dispatch::NoReply
            },
            (SessionState::Ready, method) => {
                tracing::debug!(
                    session = %self.handle.id(),
                    method,
                    "Ignoring unknown notification"
                );
                Dispatch::NoReply
            },
            (_, method) => self.sequence_error(None, method),
        }
    }

    async fn route_request(&mut self, state: SessionState, req: Request) -> Dispatch {
        tracing::debug!(session = %self.handle.id(), id = %req.id, method = %req.method, "Request");

        let method = req.method.clone();
        match (state, method.as_str()) {
            (SessionState::Created, methods::INITIALIZE) => self.initialize(req),
            (SessionState::Ready, methods::PING) => {
                Dispatch::Reply(Message::success(req.id, json!({})))
            },
            (SessionState::Ready, methods::TOOLS_LIST) => {
                Dispatch::Reply(Message::success(req.id, self.state.registry.list_result()))
            },
            (SessionState::Ready, methods::TOOLS_CALL) => self.call_tool(req).await,
            (SessionState::Ready, methods::INITIALIZE) => {
                self.sequence_error(Some(req.id), methods::INITIALIZE)
            },
            (SessionState::Ready, method) => Dispatch::Reply(Message::error(
                Some(req.id.clone()),
                ErrorObject::new(ErrorKind::MethodNotFound, format!("unknown method: {method}"))
                    .with_detail(json!({"method": method})),
            )),
            (_, method) => self.sequence_error(Some(req.id.clone()), method),
        }
    }

    fn initialize(&mut self, req: Request) -> Dispatch {
        self.transition(SessionEvent::HandshakeReceived);

        let params = match InitializeParams::parse(req.params.as_ref()) {
            Ok(params) => params,
            Err(message) => {
                tracing::info!(session = %self.handle.id(), error = %message, "Handshake failed");
                self.transition(SessionEvent::HandshakeFailed);
                return Dispatch::Reply(Message::error_kind(
                    Some(req.id),
                    ErrorKind::SchemaViolation,
                    &message,
                ));
            },
        };

        let server = Capabilities::server();
        let negotiated = server.negotiate(
            &params.protocol_version,
            &Capabilities::from_value(&params.capabilities),
        );
        let result = InitializeResult {
            protocol_version: negotiated.protocol_version.clone(),
            capabilities: server,
            server_info: Implementation::server(),
        };

        tracing::info!(
            session = %self.handle.id(),
            client = %params.client_info.name,
            requested = %params.protocol_version,
            negotiated = %negotiated.protocol_version,
            "Session negotiated"
        );
        self.session.set_negotiated(negotiated, params.client_info);
        self.transition(SessionEvent::Negotiated);

        match serde_json::to_value(result) {
            Ok(result) => Dispatch::Reply(Message::success(req.id, result)),
            Err(err) => Dispatch::Reply(Message::error_kind(
                Some(req.id),
                ErrorKind::Custom("InternalError".to_string()),
                &err.to_string(),
            )),
        }
    }

    async fn call_tool(&mut self, req: Request) -> Dispatch {
        let id = req.id;
        let params = req.params.unwrap_or_else(|| json!({}));

        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return Dispatch::Reply(Message::error_kind(
                Some(id),
                ErrorKind::SchemaViolation,
                "tools/call requires a string name",
            ));
        };

        let Some(tool) = self.state.registry.lookup(name) else {
            tracing::debug!(session = %self.handle.id(), tool = name, "Unknown tool");
            return Dispatch::Reply(Message::error(
                Some(id),
                ErrorObject::new(ErrorKind::UnknownTool, format!("unknown tool: {name}"))
                    .with_detail(json!({"name": name})),
            ));
        };

        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => json!({}),
            Some(arguments) => arguments.clone(),
        };
        if let Err(message) = tool.input_schema().validate(&arguments) {
            return Dispatch::Reply(Message::error(
                Some(id),
                ErrorObject::new(ErrorKind::SchemaViolation, message)
                    .with_detail(json!({"tool": name})),
            ));
        }

        let options = CallOptions {
            access_token: self.meta.access_token.clone(),
            progress_token: params
                .get("_meta")
                .and_then(|meta| meta.get("progressToken"))
                .filter(|token| token.is_string() || token.is_number())
                .cloned(),
            session_outbound: Some(self.handle.outbound()),
        };

        match self
            .state
            .engine
            .submit(self.handle.id(), id.clone(), tool, arguments, options)
            .await
        {
            Ok(pending) => {
                self.session.record_call();
                Dispatch::Pending(pending)
            },
            Err(McpError::DuplicateCorrelationId(_)) => Dispatch::Reply(Message::error_kind(
                Some(id),
                ErrorKind::DuplicateCorrelationId,
                "a request with this id is still in flight",
            )),
            Err(err) => Dispatch::Reply(Message::error_kind(
                Some(id),
                ErrorKind::ToolExecutionError,
                &err.to_string(),
            )),
        }
    }

    fn sequence_error(&mut self, id: Option<CorrelationId>, method: &str) -> Dispatch {
        let state = self.session.state();
        tracing::info!(
            session = %self.handle.id(),
            ?state,
            method,
            "Out-of-sequence message, closing session"
        );
        self.transition(SessionEvent::SequenceViolation);
        Dispatch::Reply(Message::error(
            id,
            ErrorObject::new(
                ErrorKind::ProtocolSequenceError,
                format!("{method} not allowed in state {state:?}"),
            ),
        ))
    }

    /// Apply an event; entering `Closing` schedules the drain
    fn transition(&mut self, event: SessionEvent) {
        if let Ok(SessionState::Closing) = apply_logged(self.session, event) {
            self.close = true;
        }
    }
}

fn cancel_target(params: Option<&Value>) -> Option<CorrelationId> {
    let raw = match params?.get("requestId")? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    CorrelationId::new(raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerConfig;
    use crate::tools::{InputSchema, ToolDescriptor, ToolRegistry};

    fn cid(s: &str) -> CorrelationId {
        CorrelationId::new(s).unwrap()
    }

    fn app() -> Arc<AppState> {
        let mut registry = ToolRegistry::new();
        registry
            .register(ToolDescriptor::from_fn(
                "echo",
                "Echo",
                InputSchema::new(json!({
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }))
                .unwrap(),
                |args, _| async move { Ok(args["text"].clone()) },
            ))
            .unwrap();
        Arc::new(AppState::new(ServerConfig::default(), registry))
    }

    fn initialize(id: &str) -> Message {
        Message::request(
            cid(id),
            methods::INITIALIZE,
            Some(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "test", "version": "1.0"}
            })),
        )
    }

    fn kind_of(dispatch: &Dispatch) -> Option<ErrorKind> {
        dispatch.reply()?.as_response()?.error().map(|e| e.kind.clone())
    }

    async fn ready(state: &Arc<AppState>) -> SessionId {
        let id = state.sessions.create().await.id().clone();
        let reply = handle(state, &id, initialize("init"), &RequestMeta::default()).await;
        assert!(kind_of(&reply).is_none());
        id
    }

    #[tokio::test]
    async fn test_handshake_reaches_ready() {
        let state = app();
        let id = state.sessions.create().await.id().clone();

        let reply = handle(&state, &id, initialize("1"), &RequestMeta::default()).await;
        let result = reply.reply().unwrap().as_response().unwrap().result().unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], "analytics-mcp");
        assert_eq!(result["capabilities"]["tools"]["listChanged"], false);

        let session = state.sessions.get(&id).await.unwrap();
        assert_eq!(session.lock().await.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_bad_handshake_closes() {
        let state = app();
        let id = state.sessions.create().await.id().clone();

        let reply = handle(
            &state,
            &id,
            Message::request(cid("1"), methods::INITIALIZE, Some(json!({"capabilities": {}}))),
            &RequestMeta::default(),
        )
        .await;
        assert_eq!(kind_of(&reply), Some(ErrorKind::SchemaViolation));

        let state_now = match state.sessions.get(&id).await {
            Some(handle) => handle.lock().await.state(),
            None => SessionState::Closed,
        };
        assert!(state_now.is_closing());
    }

    #[tokio::test]
    async fn test_call_before_handshake() {
        let state = app();
        let id = state.sessions.create().await.id().clone();

        let reply = handle(
            &state,
            &id,
            Message::request(cid("1"), methods::TOOLS_LIST, None),
            &RequestMeta::default(),
        )
        .await;
        assert_eq!(kind_of(&reply), Some(ErrorKind::ProtocolSequenceError));
        assert_eq!(reply.reply().unwrap().id(), Some(&cid("1")));
    }

    #[tokio::test]
    async fn test_second_initialize_is_sequence_error() {
        let state = app();
        let id = ready(&state).await;

        let reply = handle(&state, &id, initialize("again"), &RequestMeta::default()).await;
        assert_eq!(kind_of(&reply), Some(ErrorKind::ProtocolSequenceError));
    }

    #[tokio::test]
    async fn test_ping_and_list() {
        let state = app();
        let id = ready(&state).await;
        let meta = RequestMeta::default();

        let ping = Message::request(cid("p"), methods::PING, None);
        let pong = handle(&state, &id, ping, &meta).await;
        assert_eq!(pong.reply().unwrap().as_response().unwrap().result(), Some(&json!({})));

        let request = Message::request(cid("l"), methods::TOOLS_LIST, None);
        let list = handle(&state, &id, request, &meta).await;
        let result = list.reply().unwrap().as_response().unwrap().result().unwrap();
        assert_eq!(result["tools"][0]["name"], "echo");
        assert_eq!(result["tools"][0]["inputSchema"]["required"][0], "text");
    }

    #[tokio::test]
    async fn test_unknown_method_and_notification() {
        let state = app();
        let id = ready(&state).await;
        let meta = RequestMeta::default();

        let request = Message::request(cid("x"), "resources/list", None);
        let reply = handle(&state, &id, request, &meta).await;
        assert_eq!(kind_of(&reply), Some(ErrorKind::MethodNotFound));

        let notification = Message::notification("notifications/whatever", None);
        let reply = handle(&state, &id, notification, &meta).await;
        assert!(matches!(reply, Dispatch::NoReply));
    }

    #[tokio::test]
    async fn test_tool_call_paths() {
        let state = app();
        let id = ready(&state).await;
        let meta = RequestMeta::default();

        let call = |req_id: &str, params: Value| {
            Message::request(cid(req_id), methods::TOOLS_CALL, Some(params))
        };

        let unknown = handle(&state, &id, call("u", json!({"name": "nope"})), &meta).await;
        assert_eq!(kind_of(&unknown), Some(ErrorKind::UnknownTool));
        assert!(!state.engine.is_in_flight(&id, &cid("u")).await);

        let request = call("v", json!({"name": "echo", "arguments": {}}));
        let invalid = handle(&state, &id, request, &meta).await;
        assert_eq!(kind_of(&invalid), Some(ErrorKind::SchemaViolation));

        let ok = handle(
            &state,
            &id,
            call("c", json!({"name": "echo", "arguments": {"text": "hi"}})),
            &meta,
        )
        .await;
        let Dispatch::Pending(pending) = ok else {
            panic!("expected pending call");
        };
        let response = pending.wait().await.unwrap();
        let result = response.as_response().unwrap().result().unwrap();
        assert_eq!(result["content"][0]["text"], "hi");
    }

    #[tokio::test]
    async fn test_session_close_notification() {
        let state = app();
        let id = ready(&state).await;

        let reply = handle(
            &state,
            &id,
            Message::notification(methods::SESSION_CLOSE, None),
            &RequestMeta::default(),
        )
        .await;
        assert!(matches!(reply, Dispatch::NoReply));

        // Requests after close are refused
        let reply = handle(
            &state,
            &id,
            Message::request(cid("late"), methods::PING, None),
            &RequestMeta::default(),
        )
        .await;
        let kind = kind_of(&reply);
        assert!(matches!(
            kind,
            Some(ErrorKind::SessionClosed | ErrorKind::SessionNotFound)
        ));
    }

    #[test]
    fn test_cancel_target() {
        assert_eq!(cancel_target(Some(&json!({"requestId": "a"}))), Some(cid("a")));
        assert_eq!(cancel_target(Some(&json!({"requestId": 7}))), Some(cid("7")));
        assert_eq!(cancel_target(Some(&json!({}))), None);
        assert_eq!(cancel_target(None), None);
    }
}
