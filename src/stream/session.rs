//! # Stream Session State
//!
//! Tracks the lifecycle of one client/upstream socket pair. The bridge actor
//! (websocket.rs) owns the sockets; this type decides what the actor is
//! allowed to do with them.
//!
//! ## Session Lifecycle:
//! 1. **Connecting**: client upgraded, upstream handshake in flight
//! 2. **Active**: both sockets open, frames flow in both directions
//! 3. **Closing**: one side closed; the other is being closed
//! 4. **Closed**: both sockets released
//!
//! Close events are idempotent: only the first one asks the bridge to close
//! the peer, later ones are no-ops.

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }
}

/// One end of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Upstream,
}

impl Side {
    pub fn peer(self) -> Side {
        match self {
            Side::Client => Side::Upstream,
            Side::Upstream => Side::Client,
        }
    }
}

/// What the bridge has to do after a close event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// First close of the session: close the given side too.
    ClosePeer(Side),
    /// The session was already closing or closed.
    Nothing,
}

/// State and counters for one stream session.
#[derive(Debug)]
pub struct StreamSession {
    id: Uuid,
    model: String,
    state: SessionState,
    opened_at: DateTime<Utc>,
    frames_to_upstream: u64,
    frames_to_client: u64,
    bytes_to_upstream: u64,
    bytes_to_client: u64,
}

impl StreamSession {
    /// Create a session in the Connecting state. The model is fixed for its lifetime.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            model: model.into(),
            state: SessionState::Connecting,
            opened_at: Utc::now(),
            frames_to_upstream: 0,
            frames_to_client: 0,
            bytes_to_upstream: 0,
            bytes_to_client: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Upstream handshake finished.
    ///
    /// ## State Transition:
    /// Connecting → Active
    ///
    /// Fails when the client already went away while the handshake was in
    /// flight; the caller must then discard the new upstream socket.
    pub fn activate(&mut self) -> Result<(), String> {
        match self.state {
            SessionState::Connecting => {
                self.state = SessionState::Active;
                Ok(())
            }
            other => Err(format!("Cannot activate session from state: {}", other.as_str())),
        }
    }

    /// Frames are forwarded only while both sockets are open.
    pub fn can_forward(&self) -> bool {
        self.state == SessionState::Active
    }

    /// One side closed (close frame, error, or end of stream).
    ///
    /// ## State Transition:
    /// Connecting/Active → Closing
    pub fn on_close(&mut self, from: Side) -> CloseAction {
        match self.state {
            SessionState::Connecting | SessionState::Active => {
                self.state = SessionState::Closing;
                CloseAction::ClosePeer(from.peer())
            }
            SessionState::Closing | SessionState::Closed => CloseAction::Nothing,
        }
    }

    /// Both sockets released. Terminal.
    pub fn finish(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Count one frame delivered to `to`.
    pub fn record_forwarded(&mut self, to: Side, len: usize) {
        match to {
            Side::Upstream => {
                self.frames_to_upstream += 1;
                self.bytes_to_upstream += len as u64;
            }
            Side::Client => {
                self.frames_to_client += 1;
                self.bytes_to_client += len as u64;
            }
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            frames_to_upstream: self.frames_to_upstream,
            frames_to_client: self.frames_to_client,
            bytes_to_upstream: self.bytes_to_upstream,
            bytes_to_client: self.bytes_to_client,
            duration_seconds: Utc::now()
                .signed_duration_since(self.opened_at)
                .num_milliseconds() as f64
                / 1000.0,
        }
    }
}

/// Totals logged when a session ends.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub frames_to_upstream: u64,
    pub frames_to_client: u64,
    pub bytes_to_upstream: u64,
    pub bytes_to_client: u64,
    pub duration_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_connecting_and_does_not_forward() {
        let session = StreamSession::new("nova-2");
        assert_eq!(session.state(), SessionState::Connecting);
        assert_eq!(session.model(), "nova-2");
        assert!(!session.can_forward());
    }

    #[test]
    fn test_activate_then_forward() {
        let mut session = StreamSession::new("nova-2");
        assert!(session.activate().is_ok());
        assert_eq!(session.state(), SessionState::Active);
        assert!(session.can_forward());
        assert!(session.activate().is_err());
    }

    #[test]
    fn test_upstream_close_closes_client() {
        let mut session = StreamSession::new("nova-2");
        session.activate().unwrap();
        assert_eq!(session.on_close(Side::Upstream), CloseAction::ClosePeer(Side::Client));
        assert_eq!(session.state(), SessionState::Closing);
        assert!(!session.can_forward());
    }

    #[test]
    fn test_client_close_closes_upstream() {
        let mut session = StreamSession::new("nova-2");
        session.activate().unwrap();
        assert_eq!(session.on_close(Side::Client), CloseAction::ClosePeer(Side::Upstream));
    }

    /// Second close (from either side) is a no-op.
    #[test]
    fn test_close_is_idempotent() {
        let mut session = StreamSession::new("nova-2");
        session.activate().unwrap();
        session.on_close(Side::Client);
        assert_eq!(session.on_close(Side::Upstream), CloseAction::Nothing);
        assert_eq!(session.on_close(Side::Client), CloseAction::Nothing);

        session.finish();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.on_close(Side::Upstream), CloseAction::Nothing);
        assert!(session.activate().is_err());
    }

    /// Client leaving during the upstream handshake must prevent activation.
    #[test]
    fn test_close_while_connecting_blocks_activation() {
        let mut session = StreamSession::new("nova-2");
        assert_eq!(session.on_close(Side::Client), CloseAction::ClosePeer(Side::Upstream));
        assert!(session.activate().is_err());
        assert!(!session.can_forward());
    }

    #[test]
    fn test_forwarded_counters() {
        let mut session = StreamSession::new("nova-3");
        session.record_forwarded(Side::Upstream, 320);
        session.record_forwarded(Side::Upstream, 320);
        session.record_forwarded(Side::Client, 57);

        let summary = session.summary();
        assert_eq!(summary.frames_to_upstream, 2);
        assert_eq!(summary.bytes_to_upstream, 640);
        assert_eq!(summary.frames_to_client, 1);
        assert_eq!(summary.bytes_to_client, 57);
        assert!(summary.duration_seconds >= 0.0);
    }

    #[test]
    fn test_sessions_get_distinct_ids() {
        assert_ne!(StreamSession::new("a").id(), StreamSession::new("a").id());
    }
}
