//! Tool execution engine.
//!
//! Every accepted `tools/call` becomes an [`InFlightCall`] keyed by
//! `(session id, correlation id)`. The handler runs on its own task; a second
//! supervisor task races it against the call timeout and the call's
//! cancellation token, then emits the single response for the call.
//!
//! ```text
//!            submit()
//!               │
//!     ┌─────────┴──────────┐
//!     ▼                    ▼
//!  handler task      supervisor task ── select! { handler | cancelled | timeout }
//!     │                    │
//!     └──── JoinHandle ────┘
//!                          │
//!                          ▼
//!                 response (oneshot)  +  progress (mpsc, else session broadcast)
//! ```
//!
//! | Outcome        | Response emitted          |
//! |----------------|---------------------------|
//! | handler `Ok`   | success                   |
//! | handler `Err`  | `ToolExecutionError`      |
//! | handler panic  | `ToolExecutionError`      |
//! | timeout        | `Timeout`                 |
//! | client cancel  | `Cancelled`               |
//! | session close  | none                      |
//!
//! After cancellation or timeout the handler gets a grace period to observe
//! its token, then its task is aborted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, Notify};
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, McpError, Result};
use crate::protocol::{CorrelationId, ErrorObject, Message, SessionId};
use crate::tools::{call_result, ProgressReporter, ToolContext, ToolDescriptor, ToolError};

/// Default wall-clock limit for one call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Default time a cancelled handler gets before it is aborted
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(2);
/// Per-call progress buffer; overflow is dropped
const PROGRESS_BUFFER: usize = 64;

type CallKey = (SessionId, CorrelationId);

/// Engine timing configuration
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Wall-clock limit per call
    pub call_timeout: Duration,
    /// Grace period between cancellation and abort
    pub cancel_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }
}

/// Why a call was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// `notifications/cancelled` from the client
    Client,
    /// Call exceeded its timeout
    Timeout,
    /// Owning session is closing
    SessionClosed,
}

/// Non-blocking outbound path for server-initiated messages.
///
/// Messages go to the call's own stream while someone listens on it, else to
/// the session's broadcast stream, else they are dropped.
#[derive(Debug, Clone, Default)]
pub struct NotificationSink {
    call: Option<mpsc::Sender<Message>>,
    session: Option<broadcast::Sender<Message>>,
}

impl NotificationSink {
    /// Create a sink
    pub fn new(
        call: Option<mpsc::Sender<Message>>,
        session: Option<broadcast::Sender<Message>>,
    ) -> Self {
        Self { call, session }
    }

    /// Sink that drops everything
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Deliver a message without blocking. Returns whether anyone received it.
    pub fn send(&self, message: Message) -> bool {
        let message = match &self.call {
            Some(tx) => match tx.try_send(message) {
                Ok(()) => return true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!("Call stream full, dropping notification");
                    return false;
                },
                Err(mpsc::error::TrySendError::Closed(message)) => message,
            },
            None => message,
        };

        match &self.session {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }
}

/// Cancellation state shared by a call's handler and supervisor
#[derive(Debug, Default)]
struct CallControl {
    token: CancellationToken,
    reason: OnceLock<CancelReason>,
}

impl CallControl {
    /// First reason wins; later cancels are no-ops
    fn cancel(&self, reason: CancelReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.token.cancel();
        first
    }

    fn reason(&self) -> Option<CancelReason> {
        self.reason.get().copied()
    }
}

/// A call currently owned by the engine
#[derive(Debug)]
pub struct InFlightCall {
    /// Correlation id of the request
    pub id: CorrelationId,
    /// Owning session
    pub session_id: SessionId,
    /// Tool being run
    pub tool: String,
    /// When the call was submitted
    pub started: Instant,
    serial: u64,
    control: Arc<CallControl>,
    abort: AbortHandle,
}

impl InFlightCall {
    /// Cancellation reason, once cancelled
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.control.reason()
    }
}

/// Per-call options supplied by the dispatcher
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Caller's bearer token
    pub access_token: Option<String>,
    /// `_meta.progressToken` of the request
    pub progress_token: Option<Value>,
    /// Session outbound stream for notifications nobody waits on per call
    pub session_outbound: Option<broadcast::Sender<Message>>,
}

/// Event yielded by a [`PendingCall`]
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    /// `notifications/progress` for this call
    Progress(Message),
    /// The call's final response
    Response(Message),
}

/// Handle for a submitted call
#[derive(Debug)]
pub struct PendingCall {
    id: CorrelationId,
    response: oneshot::Receiver<Message>,
    progress: Option<mpsc::Receiver<Message>>,
    done: bool,
}

impl PendingCall {
    /// Correlation id of the call
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Wait for the response, ignoring progress.
    ///
    /// Returns `None` if the session closed first. Progress is rerouted to
    /// the session stream once this is called.
    pub async fn wait(mut self) -> Option<Message> {
        self.progress = None;
        self.response.await.ok()
    }

    /// Next progress notification or the final response.
    ///
    /// Progress queued before the response is yielded first. `None` once the
    /// response was yielded or the call was abandoned.
    pub async fn next_event(&mut self) -> Option<CallEvent> {
        if self.done {
            return None;
        }

        if let Some(progress) = self.progress.as_mut() {
            let next = tokio::select! {
                biased;
                Some(note) = progress.recv() => Ok(note),
                response = &mut self.response => Err(response),
            };
            match next {
                Ok(note) => return Some(CallEvent::Progress(note)),
                Err(response) => {
                    self.done = true;
                    return response.ok().map(CallEvent::Response);
                },
            }
        }

        self.done = true;
        (&mut self.response).await.ok().map(CallEvent::Response)
    }
}

struct EngineInner {
    config: EngineConfig,
    calls: Mutex<HashMap<CallKey, InFlightCall>>,
    changed: Notify,
    serial: AtomicU64,
}

/// Runs tool handlers under timeout and cancellation supervision
#[derive(Clone)]
pub struct ExecutionEngine {
    inner: Arc<EngineInner>,
}

impl ExecutionEngine {
    /// Create an engine
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                calls: Mutex::new(HashMap::new()),
                changed: Notify::new(),
                serial: AtomicU64::new(0),
            }),
        }
    }

    /// Timing configuration
    pub fn config(&self) -> EngineConfig {
        self.inner.config
    }

    /// Start a tool call.
    ///
    /// Fails with [`McpError::DuplicateCorrelationId`] if the same id is still
    /// in flight for the session; nothing is spawned in that case.
    pub async fn submit(
        &self,
        session_id: &SessionId,
        id: CorrelationId,
        tool: &ToolDescriptor,
        arguments: Value,
        options: CallOptions,
    ) -> Result<PendingCall> {
        let key = (session_id.clone(), id.clone());
        let mut calls = self.inner.calls.lock().await;
        if calls.contains_key(&key) {
            return Err(McpError::DuplicateCorrelationId(id.to_string()));
        }

        let control = Arc::new(CallControl::default());
        let (response_tx, response_rx) = oneshot::channel();
        let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_BUFFER);

        let sink = NotificationSink::new(Some(progress_tx), options.session_outbound);
        let ctx = ToolContext::new(
            session_id.clone(),
            id.clone(),
            control.token.child_token(),
            options.access_token,
            ProgressReporter::new(options.progress_token, sink),
        );

        let handler = tool.handler();
        let handle = tokio::spawn(async move { handler.call(arguments, ctx).await });

        let serial = self.inner.serial.fetch_add(1, Ordering::Relaxed);
        calls.insert(
            key.clone(),
            InFlightCall {
                id: id.clone(),
                session_id: session_id.clone(),
                tool: tool.name().to_string(),
                started: Instant::now(),
                serial,
                control: Arc::clone(&control),
                abort: handle.abort_handle(),
            },
        );
        drop(calls);

        tracing::debug!(session = %session_id, id = %id, tool = tool.name(), "Call submitted");

        tokio::spawn(supervise(
            Arc::clone(&self.inner),
            key,
            serial,
            handle,
            control,
            response_tx,
        ));

        Ok(PendingCall {
            id,
            response: response_rx,
            progress: Some(progress_rx),
            done: false,
        })
    }

    /// Cancel a call at the client's request.
    ///
    /// Unknown or finished calls are a silent no-op; returns whether a call
    /// was cancelled.
    pub async fn cancel(&self, session_id: &SessionId, id: &CorrelationId) -> bool {
        let calls = self.inner.calls.lock().await;
        match calls.get(&(session_id.clone(), id.clone())) {
            Some(call) => {
                let first = call.control.cancel(CancelReason::Client);
                if first {
                    tracing::debug!(session = %session_id, id = %id, "Call cancelled by client");
                }
                first
            },
            None => false,
        }
    }

    /// Cancel every call of a session and wait for them to finish.
    ///
    /// Calls still running after `grace` are aborted. No responses are
    /// emitted. Returns the number of calls that had to be aborted.
    pub async fn drain_session(&self, session_id: &SessionId, grace: Duration) -> usize {
        let mut pending = 0;
        for call in self.inner.calls.lock().await.values() {
            if &call.session_id == session_id {
                call.control.cancel(CancelReason::SessionClosed);
                pending += 1;
            }
        }
        if pending == 0 {
            return 0;
        }

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.session_call_count(session_id).await == 0 {
                return 0;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }

        let mut calls = self.inner.calls.lock().await;
        let mut abandoned = 0;
        calls.retain(|_, call| {
            if &call.session_id != session_id {
                return true;
            }
            tracing::warn!(
                session = %session_id,
                id = %call.id,
                tool = %call.tool,
                elapsed_ms = call.started.elapsed().as_millis() as u64,
                "Abandoning call after grace period"
            );
            call.abort.abort();
            abandoned += 1;
            false
        });
        drop(calls);
        self.inner.changed.notify_waiters();
        abandoned
    }

    /// Number of calls in flight across all sessions
    pub async fn in_flight_count(&self) -> usize {
        self.inner.calls.lock().await.len()
    }

    /// Number of calls in flight for one session
    pub async fn session_call_count(&self, session_id: &SessionId) -> usize {
        self.inner
            .calls
            .lock()
            .await
            .values()
            .filter(|call| &call.session_id == session_id)
            .count()
    }

    /// Check if a call is in flight
    pub async fn is_in_flight(&self, session_id: &SessionId, id: &CorrelationId) -> bool {
        self.inner
            .calls
            .lock()
            .await
            .contains_key(&(session_id.clone(), id.clone()))
    }
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl EngineInner {
    /// Drop the call's record if it is still the one we submitted
    async fn release(&self, key: &CallKey, serial: u64) {
        let mut calls = self.calls.lock().await;
        if calls.get(key).is_some_and(|call| call.serial == serial) {
            calls.remove(key);
        }
        drop(calls);
        self.changed.notify_waiters();
    }
}

enum Race {
    Finished(std::result::Result<std::result::Result<Value, ToolError>, JoinError>),
    Cancelled,
    TimedOut,
}

async fn supervise(
    inner: Arc<EngineInner>,
    key: CallKey,
    serial: u64,
    mut handle: JoinHandle<std::result::Result<Value, ToolError>>,
    control: Arc<CallControl>,
    response_tx: oneshot::Sender<Message>,
) {
    let (session_id, id) = key.clone();
    let started = Instant::now();

    let race = tokio::select! {
        biased;
        joined = &mut handle => Race::Finished(joined),
        _ = control.token.cancelled() => Race::Cancelled,
        _ = tokio::time::sleep(inner.config.call_timeout) => Race::TimedOut,
    };

    match race {
        Race::Finished(joined) => {
            let message = finished_response(control.reason(), joined, &session_id, &id);
            inner.release(&key, serial).await;
            if let Some(message) = message {
                let _ = response_tx.send(message);
            }
        },
        Race::TimedOut => {
            control.cancel(CancelReason::Timeout);
            tracing::warn!(
                session = %session_id,
                id = %id,
                timeout_ms = inner.config.call_timeout.as_millis() as u64,
                "Call timed out"
            );
            inner.release(&key, serial).await;
            let _ = response_tx.send(Message::error(
                Some(id.clone()),
                ErrorObject::new(ErrorKind::Timeout, "tool call timed out").with_detail(json!({
                    "timeout_ms": inner.config.call_timeout.as_millis() as u64,
                })),
            ));
            await_grace(&mut handle, inner.config.cancel_grace, &session_id, &id).await;
        },
        Race::Cancelled => match control.reason() {
            Some(CancelReason::SessionClosed) => {
                drop(response_tx);
                await_grace(&mut handle, inner.config.cancel_grace, &session_id, &id).await;
                inner.release(&key, serial).await;
            },
            _ => {
                inner.release(&key, serial).await;
                let _ = response_tx.send(cancelled(&id));
                await_grace(&mut handle, inner.config.cancel_grace, &session_id, &id).await;
            },
        },
    }

    tracing::debug!(
        session = %session_id,
        id = %id,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Call finished"
    );
}

/// Response for a handler that ran to completion.
///
/// A result that is already in hand wins over a client cancel that raced it;
/// an error after a client cancel is reported as `Cancelled`.
fn finished_response(
    reason: Option<CancelReason>,
    joined: std::result::Result<std::result::Result<Value, ToolError>, JoinError>,
    session_id: &SessionId,
    id: &CorrelationId,
) -> Option<Message> {
    match (reason, joined) {
        (Some(CancelReason::SessionClosed), _) => None,
        (_, Ok(Ok(value))) => Some(Message::success(id.clone(), call_result(&value))),
        (Some(CancelReason::Client), _) => Some(cancelled(id)),
        (_, Ok(Err(err))) => {
            tracing::debug!(session = %session_id, id = %id, error = %err, "Tool returned error");
            let mut error = ErrorObject::new(ErrorKind::ToolExecutionError, err.message);
            if let Some(detail) = err.detail {
                error = error.with_detail(detail);
            }
            Some(Message::error(Some(id.clone()), error))
        },
        (_, Err(join)) if join.is_panic() => {
            tracing::error!(session = %session_id, id = %id, "Tool handler panicked");
            Some(Message::error_kind(
                Some(id.clone()),
                ErrorKind::ToolExecutionError,
                "tool handler panicked",
            ))
        },
        // Aborted by a session drain
        (_, Err(_)) => None,
    }
}

fn cancelled(id: &CorrelationId) -> Message {
    Message::error_kind(Some(id.clone()), ErrorKind::Cancelled, "tool call cancelled")
}

async fn await_grace<T>(
    handle: &mut JoinHandle<T>,
    grace: Duration,
    session_id: &SessionId,
    id: &CorrelationId,
) {
    if tokio::time::timeout(grace, &mut *handle).await.is_err() {
        tracing::warn!(session = %session_id, id = %id, "Handler ignored cancellation, aborting");
        handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Outcome;
    use crate::tools::InputSchema;

    fn engine(timeout_ms: u64) -> ExecutionEngine {
        ExecutionEngine::new(EngineConfig {
            call_timeout: Duration::from_millis(timeout_ms),
            cancel_grace: Duration::from_millis(50),
        })
    }

    fn cid(s: &str) -> CorrelationId {
        CorrelationId::new(s).unwrap()
    }

    fn echo() -> ToolDescriptor {
        ToolDescriptor::from_fn("echo", "", InputSchema::empty(), |args, _| async move { Ok(args) })
    }

    fn sleeper(ms: u64) -> ToolDescriptor {
        ToolDescriptor::from_fn("sleep", "", InputSchema::empty(), move |_, ctx| async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(json!("woke")),
                _ = ctx.cancellation().cancelled() => Err(ToolError::new("stopped")),
            }
        })
    }

    fn stubborn() -> ToolDescriptor {
        ToolDescriptor::from_fn("stubborn", "", InputSchema::empty(), |_, _| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(json!(null))
        })
    }

    fn error_kind(message: &Message) -> Option<ErrorKind> {
        message.as_response()?.error().map(|e| e.kind.clone())
    }

    #[tokio::test]
    async fn test_success_response() {
        let engine = engine(1000);
        let session = SessionId::generate();
        let pending = engine
            .submit(&session, cid("1"), &echo(), json!({"a": 1}), CallOptions::default())
            .await
            .unwrap();

        let response = pending.wait().await.unwrap();
        assert_eq!(response.id(), Some(&cid("1")));
        let result = response.as_response().unwrap().result().unwrap();
        assert_eq!(result["content"][0]["text"], r#"{"a":1}"#);
        assert_eq!(engine.in_flight_count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_correlation_id() {
        let engine = engine(1000);
        let session = SessionId::generate();
        let first = engine
            .submit(&session, cid("dup"), &sleeper(200), json!({}), CallOptions::default())
            .await
            .unwrap();

        let err = engine
            .submit(&session, cid("dup"), &echo(), json!({}), CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::DuplicateCorrelationId(_)));

        // Same id in another session is independent
        let other = SessionId::generate();
        assert!(engine
            .submit(&other, cid("dup"), &echo(), json!({}), CallOptions::default())
            .await
            .is_ok());

        // First call unaffected
        let response = first.wait().await.unwrap();
        assert!(error_kind(&response).is_none());
    }

    #[tokio::test]
    async fn test_tool_error_carries_detail() {
        let engine = engine(1000);
        let tool = ToolDescriptor::from_fn("fail", "", InputSchema::empty(), |_, _| async {
            Err(ToolError::new("quota exceeded").with_detail(json!({"retry_after": 60})))
        });
        let response = engine
            .submit(&SessionId::generate(), cid("1"), &tool, json!({}), CallOptions::default())
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        let error = response.as_response().unwrap().error().unwrap();
        assert_eq!(error.kind, ErrorKind::ToolExecutionError);
        assert_eq!(error.message, "quota exceeded");
        assert_eq!(error.detail.as_ref().unwrap()["retry_after"], 60);
    }

    #[tokio::test]
    async fn test_non_object_detail_stays_decodable() {
        let engine = engine(1000);
        let tool = ToolDescriptor::from_fn("deny", "", InputSchema::empty(), |_, _| async {
            Err(ToolError::new("backend said no").with_detail(json!("HTTP 403 from data API")))
        });
        let response = engine
            .submit(&SessionId::generate(), cid("1"), &tool, json!({}), CallOptions::default())
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        let error = response.as_response().unwrap().error().unwrap();
        assert_eq!(error.detail, Some(json!({"value": "HTTP 403 from data API"})));
        assert_eq!(crate::codec::decode(&crate::codec::encode(&response)).unwrap(), response);
    }

    #[test]
    fn test_finished_result_beats_racing_cancel() {
        let session = SessionId::generate();
        let id = cid("raced");

        let response =
            finished_response(Some(CancelReason::Client), Ok(Ok(json!("done"))), &session, &id)
                .unwrap();
        assert!(error_kind(&response).is_none());

        let response = finished_response(
            Some(CancelReason::Client),
            Ok(Err(ToolError::new("stopped"))),
            &session,
            &id,
        )
        .unwrap();
        assert_eq!(error_kind(&response), Some(ErrorKind::Cancelled));

        assert!(finished_response(
            Some(CancelReason::SessionClosed),
            Ok(Ok(json!("done"))),
            &session,
            &id
        )
        .is_none());
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let engine = engine(1000);
        let session = SessionId::generate();
        let boom = ToolDescriptor::from_fn("boom", "", InputSchema::empty(), |_, _| async {
            if true {
                panic!("handler bug");
            }
            Ok(json!(null))
        });

        let sibling = engine
            .submit(&session, cid("ok"), &sleeper(50), json!({}), CallOptions::default())
            .await
            .unwrap();
        let crashed = engine
            .submit(&session, cid("boom"), &boom, json!({}), CallOptions::default())
            .await
            .unwrap();

        assert_eq!(
            error_kind(&crashed.wait().await.unwrap()),
            Some(ErrorKind::ToolExecutionError)
        );
        assert!(error_kind(&sibling.wait().await.unwrap()).is_none());
    }

    #[tokio::test]
    async fn test_timeout_then_abort() {
        let engine = engine(30);
        let session = SessionId::generate();
        let pending = engine
            .submit(&session, cid("slow"), &stubborn(), json!({}), CallOptions::default())
            .await
            .unwrap();

        let response = pending.wait().await.unwrap();
        assert_eq!(error_kind(&response), Some(ErrorKind::Timeout));
        assert!(!engine.is_in_flight(&session, &cid("slow")).await);
    }

    #[tokio::test]
    async fn test_client_cancel_yields_cancelled() {
        let engine = engine(5000);
        let session = SessionId::generate();
        let pending = engine
            .submit(&session, cid("c"), &sleeper(5000), json!({}), CallOptions::default())
            .await
            .unwrap();

        assert!(engine.cancel(&session, &cid("c")).await);
        // Second cancel is a no-op
        assert!(!engine.cancel(&session, &cid("c")).await);

        let response = pending.wait().await.unwrap();
        assert_eq!(error_kind(&response), Some(ErrorKind::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_noop() {
        let engine = engine(1000);
        let session = SessionId::generate();
        let pending = engine
            .submit(&session, cid("done"), &echo(), json!({}), CallOptions::default())
            .await
            .unwrap();
        let response = pending.wait().await.unwrap();
        assert!(matches!(
            response.as_response().unwrap().outcome,
            Outcome::Result(_)
        ));

        assert!(!engine.cancel(&session, &cid("done")).await);
        assert!(!engine.cancel(&session, &cid("never-sent")).await);
    }

    #[tokio::test]
    async fn test_drain_session_abandons_without_response() {
        let engine = engine(60_000);
        let session = SessionId::generate();
        let other = SessionId::generate();

        let cooperative = engine
            .submit(&session, cid("a"), &sleeper(60_000), json!({}), CallOptions::default())
            .await
            .unwrap();
        let ignoring = engine
            .submit(&session, cid("b"), &stubborn(), json!({}), CallOptions::default())
            .await
            .unwrap();
        let unrelated = engine
            .submit(&other, cid("a"), &sleeper(20), json!({}), CallOptions::default())
            .await
            .unwrap();

        engine.drain_session(&session, Duration::from_millis(100)).await;

        assert_eq!(engine.session_call_count(&session).await, 0);
        assert!(cooperative.wait().await.is_none());
        assert!(ignoring.wait().await.is_none());
        assert!(error_kind(&unrelated.wait().await.unwrap()).is_none());
    }

    #[tokio::test]
    async fn test_progress_events_precede_response() {
        let engine = engine(1000);
        let tool = ToolDescriptor::from_fn("steps", "", InputSchema::empty(), |_, ctx| async move {
            for step in 1..=3 {
                ctx.progress(step, Some(3), None);
            }
            Ok(json!("done"))
        });

        let mut pending = engine
            .submit(
                &SessionId::generate(),
                cid("p"),
                &tool,
                json!({}),
                CallOptions {
                    progress_token: Some(json!("tok")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let mut progress = 0;
        let mut response = None;
        while let Some(event) = pending.next_event().await {
            match event {
                CallEvent::Progress(_) => {
                    assert!(response.is_none());
                    progress += 1;
                },
                CallEvent::Response(message) => response = Some(message),
            }
        }
        assert_eq!(progress, 3);
        assert_eq!(response.unwrap().id(), Some(&cid("p")));
    }

    #[tokio::test]
    async fn test_progress_falls_back_to_session_stream() {
        let engine = engine(1000);
        let (outbound, mut session_rx) = broadcast::channel(8);
        let tool = ToolDescriptor::from_fn("late", "", InputSchema::empty(), |_, ctx| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            ctx.progress(1, None, Some("halfway"));
            Ok(json!(null))
        });

        let pending = engine
            .submit(
                &SessionId::generate(),
                cid("x"),
                &tool,
                json!({}),
                CallOptions {
                    progress_token: Some(json!(7)),
                    session_outbound: Some(outbound),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // Unary waiter drops the per-call stream
        pending.wait().await.unwrap();
        let note = session_rx.recv().await.unwrap();
        assert_eq!(note.method(), Some(crate::protocol::methods::PROGRESS));
    }

    #[test]
    fn test_sink_without_listeners_drops() {
        let (tx, rx) = broadcast::channel::<Message>(1);
        drop(rx);
        let sink = NotificationSink::new(None, Some(tx));
        assert!(!sink.send(Message::notification("x", None)));
        assert!(!NotificationSink::disabled().send(Message::notification("x", None)));
    }
}
