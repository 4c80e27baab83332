//! Protocol policy configuration
//!
//! Opcodes, event names, close-code handling and identify properties are
//! defined by the remote gateway. They live here so they can be changed from
//! a config file without touching the engine.

use serde::{Deserialize, Serialize};

/// Everything the engine needs to know about the remote protocol
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtocolPolicy {
    /// Opcode numbers
    #[serde(default)]
    pub opcodes: OpcodeTable,
    /// Event names with special meaning to the engine
    #[serde(default)]
    pub events: EventNames,
    /// Close-code classification
    #[serde(default)]
    pub close_codes: CloseCodePolicy,
    /// Connection properties sent with IDENTIFY
    #[serde(default)]
    pub properties: ConnectionProperties,
}

/// Opcode numbers used by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpcodeTable {
    pub dispatch: u8,
    pub heartbeat: u8,
    pub identify: u8,
    pub presence_update: u8,
    pub resume: u8,
    pub reconnect: u8,
    pub invalid_session: u8,
    pub hello: u8,
    pub heartbeat_ack: u8,
}

impl Default for OpcodeTable {
    fn default() -> Self {
        OpcodeTable {
            dispatch: 0,
            heartbeat: 1,
            identify: 2,
            presence_update: 3,
            resume: 6,
            reconnect: 7,
            invalid_session: 9,
            hello: 10,
            heartbeat_ack: 11,
        }
    }
}

/// Dispatch event names the engine intercepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventNames {
    /// Handshake acknowledgement carrying the session id
    pub ready: String,
    /// Resume acknowledgement
    pub resumed: String,
    /// Event whose text payload is checked for prefixed commands
    pub message: String,
    /// Payload field holding the message text
    pub content_field: String,
}

impl Default for EventNames {
    fn default() -> Self {
        EventNames {
            ready: "READY".to_string(),
            resumed: "RESUMED".to_string(),
            message: "MESSAGE_CREATE".to_string(),
            content_field: "content".to_string(),
        }
    }
}

/// How a close code received from the remote affects the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Reconnect and resume the existing session
    Resume,
    /// Reconnect with a fresh IDENTIFY
    Reidentify,
    /// Stop; credentials or capabilities were rejected
    Fatal,
}

/// Close-code classification table
///
/// Codes listed in neither table fall back to `resume_unknown`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloseCodePolicy {
    /// Codes that must never be retried
    pub fatal: Vec<u16>,
    /// Codes that invalidate the session
    pub reidentify: Vec<u16>,
    /// Whether unlisted codes (and a missing code) keep the session resumable
    pub resume_unknown: bool,
}

impl Default for CloseCodePolicy {
    fn default() -> Self {
        CloseCodePolicy {
            // Authentication failed, invalid shard, sharding required,
            // invalid API version, invalid intents, disallowed intents.
            fatal: vec![4004, 4010, 4011, 4012, 4013, 4014],
            // Invalid sequence, session timed out.
            reidentify: vec![4007, 4009],
            resume_unknown: true,
        }
    }
}

impl CloseCodePolicy {
    /// Classify a close code
    pub fn classify(&self, code: Option<u16>) -> CloseAction {
        match code {
            Some(code) if self.fatal.contains(&code) => CloseAction::Fatal,
            Some(code) if self.reidentify.contains(&code) => CloseAction::Reidentify,
            _ if self.resume_unknown => CloseAction::Resume,
            _ => CloseAction::Reidentify,
        }
    }
}

/// Client properties reported in IDENTIFY
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        ConnectionProperties {
            os: std::env::consts::OS.to_string(),
            browser: crate::NAME.to_string(),
            device: crate::NAME.to_string(),
        }
    }
}
