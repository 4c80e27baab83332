//! Gateway protocol schema
//!
//! Defines the envelope every gateway frame is decoded into.

use serde::{Deserialize, Serialize};

/// Envelope - one decoded unit of gateway traffic
///
/// Produced by the codec per inbound frame and shared read-only with the
/// session engine and the event router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Opcode
    #[serde(rename = "op")]
    pub opcode: u8,
    /// Payload
    #[serde(rename = "d", default)]
    pub payload: serde_json::Value,
    /// Sequence number (dispatch envelopes only)
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// Event name (dispatch envelopes only)
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
}

impl Envelope {
    /// Create a control envelope with no sequence or event name
    pub fn new(opcode: u8, payload: serde_json::Value) -> Self {
        Envelope {
            opcode,
            payload,
            sequence: None,
            event_name: None,
        }
    }

    /// Create a dispatch envelope
    pub fn dispatch(
        opcode: u8,
        event_name: impl Into<String>,
        sequence: u64,
        payload: serde_json::Value,
    ) -> Self {
        Envelope {
            opcode,
            payload,
            sequence: Some(sequence),
            event_name: Some(event_name.into()),
        }
    }

    /// Build a control envelope from a typed payload
    pub fn with_payload<T: Serialize>(opcode: u8, payload: &T) -> crate::error::Result<Self> {
        Ok(Self::new(opcode, serde_json::to_value(payload)?))
    }

    /// Decode the payload into a typed struct
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> crate::error::Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            crate::Error::Protocol(format!("Invalid payload for opcode {}: {}", self.opcode, e))
        })
    }

    /// Check whether this envelope carries the given event (case-insensitive)
    pub fn is_event(&self, name: &str) -> bool {
        self.event_name
            .as_deref()
            .map_or(false, |event| event.eq_ignore_ascii_case(name))
    }
}
