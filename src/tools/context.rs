//! Per-call context handed to tool handlers.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::engine::NotificationSink;
use crate::protocol::{CorrelationId, Message, SessionId};

/// Emits `notifications/progress` for a call that asked for progress
#[derive(Clone)]
pub struct ProgressReporter {
    token: Option<Value>,
    sink: NotificationSink,
}

impl ProgressReporter {
    /// Reporter for a request's `_meta.progressToken`
    pub fn new(token: Option<Value>, sink: NotificationSink) -> Self {
        Self { token, sink }
    }

    /// Reporter that drops everything
    pub fn disabled() -> Self {
        Self::new(None, NotificationSink::disabled())
    }

    /// Whether the client asked for progress
    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    /// Report progress. Never blocks; returns whether the update was delivered.
    pub fn report(&self, progress: u64, total: Option<u64>, message: Option<&str>) -> bool {
        match &self.token {
            Some(token) => self
                .sink
                .send(Message::progress(token, progress, total, message)),
            None => false,
        }
    }
}

/// Context of one tool invocation
#[derive(Clone)]
pub struct ToolContext {
    session_id: SessionId,
    request_id: Option<CorrelationId>,
    cancellation: CancellationToken,
    access_token: Option<String>,
    progress: ProgressReporter,
}

impl ToolContext {
    /// Build a context for a call
    pub fn new(
        session_id: SessionId,
        request_id: CorrelationId,
        cancellation: CancellationToken,
        access_token: Option<String>,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            session_id,
            request_id: Some(request_id),
            cancellation,
            access_token,
            progress,
        }
    }

    /// Context not bound to any session, for running handlers directly
    pub fn detached() -> Self {
        Self {
            session_id: SessionId::generate(),
            request_id: None,
            cancellation: CancellationToken::new(),
            access_token: None,
            progress: ProgressReporter::disabled(),
        }
    }

    /// Attach the caller's bearer token
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Owning session
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Correlation id of the `tools/call` request
    pub fn request_id(&self) -> Option<&CorrelationId> {
        self.request_id.as_ref()
    }

    /// Token tripped on cancel, timeout or session close
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Check if the call has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Bearer token from the HTTP `Authorization` header, if any.
    ///
    /// The core forwards it untouched; backends decide what it means.
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Report progress to the client
    pub fn progress(&self, progress: u64, total: Option<u64>, message: Option<&str>) -> bool {
        self.progress.report(progress, total, message)
    }
}
