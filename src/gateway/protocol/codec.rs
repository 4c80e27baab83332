//! Codec boundary
//!
//! Converts transport frames to envelopes and back. The engine only depends
//! on the [`Codec`] trait; [`JsonCodec`] handles the `json` encoding.

use crate::error::{Error, Result};
use crate::gateway::transport::Frame;

use super::schema::Envelope;

/// Frame <-> envelope conversion
pub trait Codec: Send + Sync {
    /// Decode a frame
    fn decode(&self, frame: &Frame) -> Result<Envelope>;

    /// Encode an envelope
    fn encode(&self, envelope: &Envelope) -> Result<Frame>;
}

/// JSON text codec
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn decode(&self, frame: &Frame) -> Result<Envelope> {
        let parsed = match frame {
            Frame::Text(text) => serde_json::from_str(text),
            Frame::Binary(bytes) => serde_json::from_slice(bytes),
        };
        parsed.map_err(|e| Error::Decode(e.to_string()))
    }

    fn encode(&self, envelope: &Envelope) -> Result<Frame> {
        Ok(Frame::Text(serde_json::to_string(envelope)?))
    }
}
