//! Gateway Protocol
//!
//! ## Envelope
//!
//! Every frame decodes to `{op, d, s, t}`: opcode, payload, optional
//! sequence number and optional event name. Only dispatch envelopes carry
//! `s` and `t`.
//!
//! ## Control envelopes
//!
//! - `Hello`: sent by the remote on connect, carries the heartbeat interval
//! - `Identify` / `Resume`: start a new session or continue an old one
//! - `Heartbeat` / `HeartbeatAck`: liveness
//! - `Reconnect` / `InvalidSession`: remote-initiated session changes
//!
//! Opcode numbers come from [`crate::config::OpcodeTable`].

pub mod codec;
pub mod schema;
pub mod types;

pub use codec::{Codec, JsonCodec};
pub use schema::Envelope;
pub use types::*;
