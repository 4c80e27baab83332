//! Session state
//!
//! A [`Session`] lives for one logical session: it is created when a fresh
//! IDENTIFY goes out, survives resumes, and is replaced on every full
//! re-identification. Only the session engine mutates it; everyone else
//! reads [`SessionSnapshot`]s published on a watch channel.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use super::protocol::ReadyPayload;
use crate::models::User;

/// Where the session engine is in its lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Opening a connection for a fresh session
    #[default]
    Connecting,
    /// Connected, waiting for HELLO and READY
    Handshaking,
    /// Session established; events are flowing
    Ready,
    /// Connection lost, a fresh session will follow
    Reconnecting,
    /// Connection lost, trying to continue the previous session
    Resuming,
    /// Terminal
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Handshaking => "handshaking",
            SessionState::Ready => "ready",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Resuming => "resuming",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Everything a RESUME needs. Only exists when both parts are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeToken {
    pub session_id: String,
    pub sequence: u64,
}

/// Outcome of observing a dispatch sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// Newer than anything seen; recorded
    Advanced,
    /// Equal to or older than the last recorded number
    Replayed { last: u64 },
}

/// Session data owned by the engine
#[derive(Debug, Clone, Default)]
pub struct Session {
    session_id: Option<String>,
    sequence: Option<u64>,
    heartbeat_interval: Option<Duration>,
    last_ack_received_at: Option<DateTime<Utc>>,
    resume_url: Option<String>,
    user: Option<User>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dispatch sequence number. Sequence numbers only move forward.
    pub fn observe_sequence(&mut self, sequence: u64) -> SequenceCheck {
        match self.sequence {
            Some(last) if sequence <= last => SequenceCheck::Replayed { last },
            _ => {
                self.sequence = Some(sequence);
                SequenceCheck::Advanced
            }
        }
    }

    /// Adopt the identity handed out in READY
    pub fn establish(&mut self, ready: ReadyPayload) {
        self.session_id = Some(ready.session_id);
        self.resume_url = ready.resume_gateway_url;
        self.user = ready.user;
    }

    pub fn record_ack(&mut self) {
        self.last_ack_received_at = Some(Utc::now());
    }

    pub fn set_heartbeat_interval(&mut self, interval: Duration) {
        self.heartbeat_interval = Some(interval);
    }

    /// Session ID and last sequence, if the session can be resumed
    pub fn resume_token(&self) -> Option<ResumeToken> {
        match (&self.session_id, self.sequence) {
            (Some(session_id), Some(sequence)) => Some(ResumeToken {
                session_id: session_id.clone(),
                sequence,
            }),
            _ => None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub fn resume_url(&self) -> Option<&str> {
        self.resume_url.as_deref()
    }

    pub fn snapshot(&self, state: SessionState) -> SessionSnapshot {
        SessionSnapshot {
            state,
            session_id: self.session_id.clone(),
            sequence: self.sequence,
            heartbeat_interval: self.heartbeat_interval,
            last_ack_received_at: self.last_ack_received_at,
            user: self.user.clone(),
        }
    }
}

/// Read-only view of the session for the application
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub session_id: Option<String>,
    pub sequence: Option<u64>,
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Option<Duration>,
    pub last_ack_received_at: Option<DateTime<Utc>>,
    /// The account this session is logged in as
    pub user: Option<User>,
}

/// Session-level notifications for the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A fresh session is ready
    Connected { session_id: String },
    /// The connection was lost; another attempt follows
    Reconnecting {
        attempt: u32,
        resume: bool,
        reason: String,
    },
    /// The previous session was resumed
    Resumed { session_id: String },
    /// The engine stopped and will not reconnect
    Closed { fatal: bool, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(session_id: &str) -> ReadyPayload {
        ReadyPayload {
            session_id: session_id.to_string(),
            resume_gateway_url: Some("wss://resume.example".to_string()),
            user: None,
        }
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let mut session = Session::new();
        assert_eq!(session.observe_sequence(1), SequenceCheck::Advanced);
        assert_eq!(session.observe_sequence(3), SequenceCheck::Advanced);
        assert_eq!(session.observe_sequence(3), SequenceCheck::Replayed { last: 3 });
        assert_eq!(session.observe_sequence(2), SequenceCheck::Replayed { last: 3 });
        assert_eq!(session.sequence(), Some(3));
    }

    #[test]
    fn test_resume_token_needs_both_parts() {
        let mut session = Session::new();
        assert!(session.resume_token().is_none());

        session.observe_sequence(5);
        assert!(session.resume_token().is_none());

        session.establish(ready("abc"));
        assert_eq!(
            session.resume_token(),
            Some(ResumeToken {
                session_id: "abc".to_string(),
                sequence: 5
            })
        );
        assert_eq!(session.resume_url(), Some("wss://resume.example"));
    }

    #[test]
    fn test_snapshot_reflects_session() {
        let mut session = Session::new();
        session.establish(ready("xyz"));
        session.observe_sequence(2);
        session.set_heartbeat_interval(Duration::from_millis(41250));
        session.record_ack();

        let snapshot = session.snapshot(SessionState::Ready);
        assert_eq!(snapshot.state, SessionState::Ready);
        assert_eq!(snapshot.session_id.as_deref(), Some("xyz"));
        assert_eq!(snapshot.sequence, Some(2));
        assert_eq!(snapshot.heartbeat_interval, Some(Duration::from_millis(41250)));
        assert!(snapshot.last_ack_received_at.is_some());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Resuming.to_string(), "resuming");
        assert_eq!(SessionState::default(), SessionState::Connecting);
    }
}
