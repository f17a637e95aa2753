//! Session state for MCP clients.
//!
//! A session is created by the first message of a client without a session
//! id, negotiated by the `initialize` handshake and closed explicitly, on
//! transport close, or when idle for too long.

use std::fmt;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use serde::Serialize;

use super::capabilities::{Implementation, NegotiatedCaps};
use crate::error::{McpError, Result};

/// Random bytes in a session id (256 bits)
const SESSION_ID_BYTES: usize = 32;

/// Opaque session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh id from the OS-seeded CSPRNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_ID_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Wrap an id received from a client
    pub fn from_client(id: &str) -> Self {
        Self(id.trim().to_string())
    }

    /// Borrow as string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Created, no handshake yet
    Created,
    /// Handshake received, negotiating capabilities
    Negotiating,
    /// Handshake complete, accepting tool traffic
    Ready,
    /// Draining in-flight calls
    Closing,
    /// Terminal
    Closed,
}

/// Events that drive the session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Valid `initialize` request received
    HandshakeReceived,
    /// Capabilities agreed
    Negotiated,
    /// Handshake params were invalid
    HandshakeFailed,
    /// Message out of order for the current state
    SequenceViolation,
    /// Client asked to close
    CloseRequested,
    /// Streaming connection went away
    ConnectionClosed,
    /// No activity for longer than the idle threshold
    IdleExpired,
    /// All in-flight calls finished or were abandoned
    Drained,
}

impl SessionState {
    /// Next state for `event`, or `None` if the transition is not allowed.
    ///
    /// | From                    | Event                                   | To            |
    /// |-------------------------|-----------------------------------------|---------------|
    /// | `Created`               | `HandshakeReceived`                     | `Negotiating` |
    /// | `Negotiating`           | `Negotiated`                            | `Ready`       |
    /// | `Created`/`Negotiating` | `HandshakeFailed`, `SequenceViolation`  | `Closing`     |
    /// | any open state          | `CloseRequested`, `ConnectionClosed`    | `Closing`     |
    /// | any open state          | `IdleExpired`                           | `Closing`     |
    /// | `Ready`                 | `SequenceViolation`                     | `Closing`     |
    /// | `Closing`               | `Drained`                               | `Closed`      |
    pub fn on(self, event: SessionEvent) -> Option<SessionState> {
        use SessionEvent as E;
        use SessionState as S;

        match (self, event) {
            (S::Created, E::HandshakeReceived) => Some(S::Negotiating),
            (S::Negotiating, E::Negotiated) => Some(S::Ready),
            (S::Created | S::Negotiating, E::HandshakeFailed)
            | (S::Created | S::Negotiating | S::Ready, E::SequenceViolation)
            | (
                S::Created | S::Negotiating | S::Ready,
                E::CloseRequested | E::ConnectionClosed | E::IdleExpired,
            ) => Some(S::Closing),
            (S::Closing, E::Drained) => Some(S::Closed),
            _ => None,
        }
    }

    /// Whether the session is on its way out
    pub fn is_closing(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

/// MCP client session
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    state: SessionState,
    negotiated: Option<NegotiatedCaps>,
    client_info: Option<Implementation>,
    created_at: Instant,
    last_activity: Instant,
    messages_received: u64,
    calls_submitted: u64,
}

impl Session {
    /// Create a session in `Created` state with a fresh id
    pub fn new() -> Self {
        Self::with_id(SessionId::generate())
    }

    /// Create with an explicit id
    pub fn with_id(id: SessionId) -> Self {
        let now = Instant::now();
        Self {
            id,
            state: SessionState::Created,
            negotiated: None,
            client_info: None,
            created_at: now,
            last_activity: now,
            messages_received: 0,
            calls_submitted: 0,
        }
    }

    /// Session id
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check if handshake is complete
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Apply a state machine event
    pub fn apply(&mut self, event: SessionEvent) -> Result<SessionState> {
        let next = self.state.on(event).ok_or(McpError::InvalidTransition {
            from: self.state,
            event,
        })?;
        self.state = next;
        Ok(next)
    }

    /// Record negotiated capabilities and client identity
    pub fn set_negotiated(&mut self, negotiated: NegotiatedCaps, client_info: Implementation) {
        self.negotiated = Some(negotiated);
        self.client_info = Some(client_info);
    }

    /// Negotiated capabilities, once the handshake completed
    pub fn negotiated(&self) -> Option<&NegotiatedCaps> {
        self.negotiated.as_ref()
    }

    /// Record an inbound message
    pub fn record_message(&mut self) {
        self.messages_received += 1;
        self.touch();
    }

    /// Record a tool call accepted into the engine
    pub fn record_call(&mut self) {
        self.calls_submitted += 1;
    }

    /// Update last activity timestamp
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Time since last activity, measured at `now`
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Get session statistics
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.id.clone(),
            state: self.state,
            protocol_version: self.negotiated.as_ref().map(|n| n.protocol_version.clone()),
            client: self.client_info.as_ref().map(|c| c.name.clone()),
            messages_received: self.messages_received,
            calls_submitted: self.calls_submitted,
            age_secs: self.created_at.elapsed().as_secs(),
            idle_secs: self.last_activity.elapsed().as_secs(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Session statistics
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    /// Session ID
    pub session_id: SessionId,
    /// Current state
    pub state: SessionState,
    /// Negotiated protocol version
    pub protocol_version: Option<String>,
    /// Client implementation name
    pub client: Option<String>,
    /// Messages received
    pub messages_received: u64,
    /// Tool calls accepted
    pub calls_submitted: u64,
    /// Seconds since creation
    pub age_secs: u64,
    /// Seconds since last activity
    pub idle_secs: u64,
}
