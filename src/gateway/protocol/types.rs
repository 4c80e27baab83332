//! Gateway protocol types
//!
//! Payloads for the control envelopes the engine sends and intercepts.

use serde::{Deserialize, Serialize};

use crate::config::ConnectionProperties;
use crate::models::User;

// ============================================================================
// Inbound
// ============================================================================

/// HELLO payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

/// READY payload (only the fields the engine needs)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyPayload {
    /// Session ID used for resuming
    pub session_id: String,
    /// URL to use when resuming this session
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    /// The bot user
    #[serde(default)]
    pub user: Option<User>,
}

// ============================================================================
// Outbound
// ============================================================================

/// IDENTIFY payload
#[derive(Debug, Clone, Serialize)]
pub struct IdentifyPayload {
    /// Bot token
    pub token: String,
    /// Intent bits
    pub intents: u64,
    /// Client properties
    pub properties: ConnectionProperties,
    /// Initial presence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<PresenceUpdate>,
}

/// RESUME payload
#[derive(Debug, Clone, Serialize)]
pub struct ResumePayload {
    /// Bot token
    pub token: String,
    /// Session being resumed
    pub session_id: String,
    /// Last sequence number processed
    pub seq: u64,
}

/// Online status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Online,
    Dnd,
    Idle,
    Invisible,
    Offline,
}

/// Activity shown under the bot's name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Activity name
    pub name: String,
    /// Activity type (0 = playing, 2 = listening, 3 = watching, 5 = competing)
    #[serde(rename = "type")]
    pub kind: u8,
}

impl Activity {
    /// "Playing {name}"
    pub fn playing(name: impl Into<String>) -> Self {
        Activity {
            name: name.into(),
            kind: 0,
        }
    }

    /// "Watching {name}"
    pub fn watching(name: impl Into<String>) -> Self {
        Activity {
            name: name.into(),
            kind: 3,
        }
    }
}

/// PRESENCE_UPDATE payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    /// Unix time in milliseconds since the client went idle
    pub since: Option<i64>,
    /// Activities
    pub activities: Vec<Activity>,
    /// Status
    pub status: Status,
    /// Whether the client is AFK
    pub afk: bool,
}

impl PresenceUpdate {
    /// Online with a single activity
    pub fn online(activity: Activity) -> Self {
        PresenceUpdate {
            since: None,
            activities: vec![activity],
            status: Status::Online,
            afk: false,
        }
    }

    /// Set the status
    pub fn with_status(mut self, status: Status) -> Self {
        if status == Status::Idle {
            self.since = Some(chrono::Utc::now().timestamp_millis());
        }
        self.status = status;
        self
    }
}
