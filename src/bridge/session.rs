//! # Call Session State
//!
//! One `CallSession` per phone call, tracking the readiness handshake with
//! the translation backend and the identifiers both legs are addressed by.
//!
//! ## Session Lifecycle:
//! 1. **Negotiating**: waiting for the one-shot session negotiation response
//! 2. **Connecting**: negotiation done, streaming socket being established
//! 3. **Configuring**: socket open, configuration event sent, awaiting ack
//! 4. **Ready**: configuration acknowledged; caller audio may flow
//! 5. **Closing**: teardown initiated by either leg
//! 6. **Closed**: both legs released, registry entry removed
//!
//! The transition methods below are the *only* place `ready_state` changes;
//! the WebSocket actor's mailbox serializes all calls into them, so a media
//! frame can never race a gate transition.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;

use crate::bridge::protocol::BackendOutbound;

/// Readiness of the translation session, as seen by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Initial state: negotiation request in flight
    Negotiating,
    /// Negotiation response received, streaming socket not yet open
    Connecting,
    /// Socket open and configuration sent, acknowledgment pending
    Configuring,
    /// Configuration acknowledged; caller audio forwarding permitted
    Ready,
    /// Teardown initiated (terminal for forwarding)
    Closing,
    /// Fully torn down (terminal)
    Closed,
}

impl ReadyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadyState::Negotiating => "negotiating",
            ReadyState::Connecting => "connecting",
            ReadyState::Configuring => "configuring",
            ReadyState::Ready => "ready",
            ReadyState::Closing => "closing",
            ReadyState::Closed => "closed",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, ReadyState::Closing | ReadyState::Closed)
    }
}

/// State for one phone call being bridged.
///
/// Owned exclusively by the call-leg actor; everything here is mutated from
/// the actor's message handlers only.
#[derive(Debug)]
pub struct CallSession {
    /// Identifier assigned by the translation backend at negotiation.
    /// Absent until negotiation completes.
    pub session_id: Option<String>,

    /// Identifier assigned by the telephony provider in the `start` event.
    /// Required to address outbound audio frames back to the correct call.
    pub stream_sid: Option<String>,

    ready_state: ReadyState,

    pub created_at: DateTime<Utc>,

    /// Diagnostic counters; not correctness-critical.
    pub frames_from_caller: u64,
    pub frames_to_caller: u64,
    pub frames_dropped: u64,
}

impl CallSession {
    pub fn new() -> Self {
        Self {
            session_id: None,
            stream_sid: None,
            ready_state: ReadyState::Negotiating,
            created_at: Utc::now(),
            frames_from_caller: 0,
            frames_to_caller: 0,
            frames_dropped: 0,
        }
    }

    pub fn ready_state(&self) -> ReadyState {
        self.ready_state
    }

    /// Negotiating → Connecting, recording the backend session identifier.
    pub fn mark_negotiated(&mut self, session_id: String) -> Result<(), String> {
        match self.ready_state {
            ReadyState::Negotiating => {
                self.session_id = Some(session_id);
                self.ready_state = ReadyState::Connecting;
                Ok(())
            }
            other => Err(format!("cannot negotiate from state {:?}", other)),
        }
    }

    /// Connecting → Configuring, once the streaming socket reports open and
    /// the configuration event has been sent.
    pub fn mark_configuring(&mut self) -> Result<(), String> {
        match self.ready_state {
            ReadyState::Connecting => {
                self.ready_state = ReadyState::Configuring;
                Ok(())
            }
            other => Err(format!("cannot start configuring from state {:?}", other)),
        }
    }

    /// Configuring → Ready, on the backend's explicit configuration
    /// acknowledgment. An implicit transition on socket-open is the known
    /// defect this design exists to avoid.
    pub fn mark_ready(&mut self) -> Result<(), String> {
        match self.ready_state {
            ReadyState::Configuring => {
                self.ready_state = ReadyState::Ready;
                Ok(())
            }
            other => Err(format!("cannot become ready from state {:?}", other)),
        }
    }

    /// Any non-terminal state → Closing. Idempotent once terminal.
    pub fn begin_close(&mut self) {
        if !self.ready_state.is_terminal() {
            self.ready_state = ReadyState::Closing;
        }
    }

    /// → Closed (terminal; not reversible).
    pub fn mark_closed(&mut self) {
        self.ready_state = ReadyState::Closed;
    }

    /// Gate predicate: caller audio may be forwarded to the backend only
    /// once the configuration handshake is acknowledged.
    pub fn can_forward_caller_audio(&self) -> bool {
        self.ready_state == ReadyState::Ready
    }

    /// Backend audio may be relayed to the caller as soon as the stream SID
    /// is known, independent of gate state; translated audio legitimately
    /// arrives while the session is still configuring.
    pub fn can_forward_backend_audio(&self) -> bool {
        self.stream_sid.is_some() && !self.ready_state.is_terminal()
    }
}

impl Default for CallSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle kept in the registry for each active call.
///
/// Dropping `backend_tx` closes the backend writer task and with it the
/// backend socket, so removing a registry entry is sufficient to release
/// the backend leg.
pub struct SessionHandle {
    pub stream_sid: Option<String>,
    pub backend_tx: mpsc::Sender<BackendOutbound>,
    pub created_at: DateTime<Utc>,
}

/// Process-wide mapping from backend session identifier to its live call.
///
/// Entries are created on successful negotiation and removed on either
/// leg's close/error. The mapping is transient; rebuilt from nothing at
/// process start; an in-flight call whose process restarts is dropped.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    max_concurrent_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_concurrent_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_concurrent_sessions,
        }
    }

    /// Register a session after negotiation succeeds.
    ///
    /// Enforces the concurrent-session limit and session-id uniqueness; a
    /// rejected insert is a setup failure for that call.
    pub fn insert(&self, session_id: &str, handle: SessionHandle) -> Result<(), String> {
        let mut sessions = self.sessions.write().unwrap();

        if sessions.len() >= self.max_concurrent_sessions {
            return Err(format!(
                "Maximum concurrent sessions ({}) reached",
                self.max_concurrent_sessions
            ));
        }

        if sessions.contains_key(session_id) {
            return Err(format!("Session ID '{}' already exists", session_id));
        }

        sessions.insert(session_id.to_string(), handle);
        Ok(())
    }

    /// Record the stream SID once the provider's `start` event arrives.
    pub fn set_stream_sid(&self, session_id: &str, stream_sid: &str) {
        let mut sessions = self.sessions.write().unwrap();
        if let Some(handle) = sessions.get_mut(session_id) {
            handle.stream_sid = Some(stream_sid.to_string());
        }
    }

    /// Remove a session on either leg's close/error. Returns whether an
    /// entry existed; removal drops the handle and releases the backend
    /// writer.
    pub fn remove(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().unwrap();
        sessions.remove(session_id).is_some()
    }

    /// Look up the backend sender for a session (exact match by ID).
    pub fn backend_tx(&self, session_id: &str) -> Option<mpsc::Sender<BackendOutbound>> {
        let sessions = self.sessions.read().unwrap();
        sessions.get(session_id).map(|h| h.backend_tx.clone())
    }

    pub fn contains(&self, session_id: &str) -> bool {
        let sessions = self.sessions.read().unwrap();
        sessions.contains_key(session_id)
    }

    pub fn active_session_count(&self) -> usize {
        let sessions = self.sessions.read().unwrap();
        sessions.len()
    }

    pub fn active_session_ids(&self) -> Vec<String> {
        let sessions = self.sessions.read().unwrap();
        sessions.keys().cloned().collect()
    }
}
