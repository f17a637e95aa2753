//! Server state and session management.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::{broadcast, Mutex, MutexGuard, RwLock};

use super::config::ServerConfig;
use crate::engine::ExecutionEngine;
use crate::error::{McpError, Result};
use crate::protocol::{Message, Session, SessionEvent, SessionId, SessionState};
use crate::tools::ToolRegistry;

/// Buffered server-initiated messages per session stream
const OUTBOUND_BUFFER: usize = 256;

/// Application state shared across handlers
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Session manager
    pub sessions: SessionManager,
    /// Registered tools, read-only after startup
    pub registry: Arc<ToolRegistry>,
    /// Tool execution engine
    pub engine: ExecutionEngine,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Create new application state
    pub fn new(config: ServerConfig, registry: ToolRegistry) -> Self {
        let engine = ExecutionEngine::new(config.engine_config());
        let sessions = SessionManager::new().with_idle_timeout(config.idle_timeout);

        Self {
            config,
            sessions,
            registry: Arc::new(registry),
            engine,
            start_time: Instant::now(),
        }
    }

    /// Get server uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Close a session: `Closing`, drain its calls, `Closed`, forget it.
    ///
    /// Returns false if the session was unknown or already closing.
    pub async fn close_session(&self, id: &SessionId, event: SessionEvent) -> bool {
        if !self.sessions.begin_close(id, event).await {
            return false;
        }
        self.finish_close(id).await;
        true
    }

    /// Drain and remove a session already in `Closing`
    pub async fn finish_close(&self, id: &SessionId) {
        let abandoned = self.engine.drain_session(id, self.config.cancel_grace).await;
        if let Err(err) = self.sessions.transition(id, SessionEvent::Drained).await {
            tracing::debug!(session = %id, error = %err, "Session vanished during drain");
        }
        self.sessions.remove(id).await;
        tracing::info!(session = %id, abandoned, "Session closed");
    }

    /// Expire idle sessions and drain them. Returns how many were expired.
    pub async fn sweep_once(&self, now: Instant) -> usize {
        let expired = self.sessions.expire_idle(now).await;
        let count = expired.len();
        join_all(expired.iter().map(|id| self.finish_close(id))).await;
        if count > 0 {
            tracing::info!(expired = count, "Idle sweep");
        }
        count
    }

    /// Close every session
    pub async fn shutdown(&self) {
        let ids = self.sessions.list_ids().await;
        tracing::info!(sessions = ids.len(), "Closing all sessions");
        join_all(
            ids.iter()
                .map(|id| self.close_session(id, SessionEvent::CloseRequested)),
        )
        .await;
    }
}

/// One live session: state behind its own lock plus its outbound stream
pub struct SessionHandle {
    id: SessionId,
    session: Mutex<Session>,
    outbound: broadcast::Sender<Message>,
}

impl SessionHandle {
    fn new(session: Session) -> Self {
        let (outbound, _) = broadcast::channel(OUTBOUND_BUFFER);
        Self {
            id: session.id().clone(),
            session: Mutex::new(session),
            outbound,
        }
    }

    /// Session id
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Lock the session. Dispatch holds this for the whole message, so
    /// messages of one session are handled in receipt order.
    pub async fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().await
    }

    /// Sender for server-initiated messages
    pub fn outbound(&self) -> broadcast::Sender<Message> {
        self.outbound.clone()
    }

    /// Subscribe to server-initiated messages
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.outbound.subscribe()
    }
}

/// Manages active sessions
pub struct SessionManager {
    /// Active sessions by ID
    sessions: Arc<RwLock<HashMap<SessionId, Arc<SessionHandle>>>>,
    /// Idle timeout
    idle_timeout: Duration,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    /// Create new session manager
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            idle_timeout: Duration::from_secs(300),
        }
    }

    /// Set idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Create a new session in `Created` state
    pub async fn create(&self) -> Arc<SessionHandle> {
        let handle = Arc::new(SessionHandle::new(Session::new()));
        self.sessions
            .write()
            .await
            .insert(handle.id().clone(), Arc::clone(&handle));
        tracing::info!(session = %handle.id(), "Session created");
        handle
    }

    /// Get session by ID
    pub async fn get(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Drive the session state machine.
    ///
    /// A rejected event is an invariant violation in the caller and is logged
    /// as an error.
    pub async fn transition(&self, id: &SessionId, event: SessionEvent) -> Result<SessionState> {
        let handle = self
            .get(id)
            .await
            .ok_or_else(|| McpError::SessionNotFound(id.to_string()))?;
        let mut session = handle.lock().await;
        apply_logged(&mut session, event)
    }

    /// Move a session to `Closing` unless it is already on its way out.
    ///
    /// Returns true if this call started the close.
    pub async fn begin_close(&self, id: &SessionId, event: SessionEvent) -> bool {
        let Some(handle) = self.get(id).await else {
            return false;
        };
        let mut session = handle.lock().await;
        if session.state().is_closing() {
            return false;
        }
        apply_logged(&mut session, event).is_ok()
    }

    /// Move every session idle for at least the timeout to `Closing`.
    ///
    /// Returns the ids that were expired; the caller drains them.
    pub async fn expire_idle(&self, now: Instant) -> Vec<SessionId> {
        let handles: Vec<_> = self.sessions.read().await.values().cloned().collect();
        let mut expired = Vec::new();

        for handle in handles {
            let mut session = handle.lock().await;
            if session.state().is_closing() || session.idle_for(now) < self.idle_timeout {
                continue;
            }
            if apply_logged(&mut session, SessionEvent::IdleExpired).is_ok() {
                tracing::info!(
                    session = %handle.id(),
                    idle_secs = session.idle_for(now).as_secs(),
                    "Session idle, expiring"
                );
                expired.push(handle.id().clone());
            }
        }

        expired
    }

    /// Remove session
    pub async fn remove(&self, id: &SessionId) -> Option<Arc<SessionHandle>> {
        self.sessions.write().await.remove(id)
    }

    /// Get session count
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Get all session IDs
    pub async fn list_ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }
}

/// Apply an event, logging rejected transitions as invariant violations
pub(crate) fn apply_logged(session: &mut Session, event: SessionEvent) -> Result<SessionState> {
    let from = session.state();
    match session.apply(event) {
        Ok(to) => {
            tracing::debug!(session = %session.id(), ?from, ?event, ?to, "Session transition");
            Ok(to)
        },
        Err(err) => {
            tracing::error!(session = %session.id(), ?from, ?event, "Invalid session transition");
            Err(err)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ready(manager: &SessionManager) -> SessionId {
        let handle = manager.create().await;
        let id = handle.id().clone();
        manager.transition(&id, SessionEvent::HandshakeReceived).await.unwrap();
        manager.transition(&id, SessionEvent::Negotiated).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_session_create_and_get() {
        let manager = SessionManager::new();
        let handle = manager.create().await;

        let retrieved = manager.get(handle.id()).await.unwrap();
        assert_eq!(retrieved.id(), handle.id());
        assert_eq!(retrieved.lock().await.state(), SessionState::Created);
    }

    #[tokio::test]
    async fn test_session_remove() {
        let manager = SessionManager::new();
        let id = manager.create().await.id().clone();

        assert!(manager.remove(&id).await.is_some());
        assert!(manager.get(&id).await.is_none());
        assert!(matches!(
            manager.transition(&id, SessionEvent::CloseRequested).await,
            Err(McpError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_session_count() {
        let manager = SessionManager::new();
        assert_eq!(manager.count().await, 0);

        manager.create().await;
        manager.create().await;
        manager.create().await;

        assert_eq!(manager.count().await, 3);
        assert_eq!(manager.list_ids().await.len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_transition_rejected() {
        let manager = SessionManager::new();
        let id = manager.create().await.id().clone();

        let err = manager.transition(&id, SessionEvent::Drained).await.unwrap_err();
        assert!(matches!(err, McpError::InvalidTransition { from: SessionState::Created, .. }));
    }

    #[tokio::test]
    async fn test_expire_idle() {
        let manager = SessionManager::new().with_idle_timeout(Duration::from_millis(100));
        let stale = ready(&manager).await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        let fresh = ready(&manager).await;

        let expired = manager.expire_idle(Instant::now()).await;
        assert_eq!(expired, vec![stale.clone()]);

        let state = manager.get(&stale).await.unwrap().lock().await.state();
        assert_eq!(state, SessionState::Closing);
        let state = manager.get(&fresh).await.unwrap().lock().await.state();
        assert_eq!(state, SessionState::Ready);

        // Already closing sessions are not expired twice
        let later = Instant::now() + Duration::from_secs(1);
        let expired = manager.expire_idle(later).await;
        assert_eq!(expired, vec![fresh]);
    }

    #[tokio::test]
    async fn test_close_session_drains_and_removes() {
        let state = AppState::new(ServerConfig::default(), ToolRegistry::new());
        let id = ready(&state.sessions).await;

        assert!(state.close_session(&id, SessionEvent::CloseRequested).await);
        assert!(state.sessions.get(&id).await.is_none());
        // Second close is a no-op
        assert!(!state.close_session(&id, SessionEvent::CloseRequested).await);
    }

    #[tokio::test]
    async fn test_sweep_once() {
        let config = ServerConfig::default().with_idle_timeout(Duration::from_secs(60));
        let state = AppState::new(config, ToolRegistry::new());
        let id = ready(&state.sessions).await;

        assert_eq!(state.sweep_once(Instant::now()).await, 0);
        let swept = state.sweep_once(Instant::now() + Duration::from_secs(61)).await;
        assert_eq!(swept, 1);
        assert!(state.sessions.get(&id).await.is_none());
    }
}
