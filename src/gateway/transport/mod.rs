//! Transport - one ordered, duplex frame connection
//!
//! A [`Connector`] opens a [`Connection`], which is already split into a
//! sending half (owned by the outbound dispatcher) and a receiving half
//! (owned by the read loop). The transport never retries; any I/O error or
//! close surfaces once as a [`Disconnect`] and retry policy lives in the
//! session engine.

pub mod memory;
pub mod websocket;

use async_trait::async_trait;
use std::fmt;

use crate::error::Result;

pub use memory::{MemoryConnector, MemoryGateway, MemoryPeer, PeerEvent};
pub use websocket::WsConnector;

/// A discrete message on the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame
    Text(String),
    /// Binary frame
    Binary(Vec<u8>),
}

/// Why a connection stopped delivering frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    /// Close code, when the peer sent one
    pub code: Option<u16>,
    /// Human readable reason
    pub reason: String,
}

impl Disconnect {
    /// Disconnect with a close code
    pub fn with_code(code: u16, reason: impl Into<String>) -> Self {
        Disconnect {
            code: Some(code),
            reason: reason.into(),
        }
    }

    /// Disconnect caused by an I/O failure or EOF
    pub fn abrupt(reason: impl Into<String>) -> Self {
        Disconnect {
            code: None,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "closed with code {} ({})", code, self.reason),
            None => write!(f, "connection lost ({})", self.reason),
        }
    }
}

/// Sending half of a connection
#[async_trait]
pub trait FrameSink: Send {
    /// Send one frame; fails with `Error::Send` when the connection is gone
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Close the connection with a close code
    async fn close(&mut self, code: u16, reason: &str) -> Result<()>;
}

/// Receiving half of a connection
#[async_trait]
pub trait FrameStream: Send {
    /// Wait for the next frame. Once a `Disconnect` is returned the stream
    /// is finished and keeps returning it.
    async fn receive(&mut self) -> std::result::Result<Frame, Disconnect>;
}

/// An open connection
pub struct Connection {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

/// Opens connections to a gateway URL
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect; fails with `Error::Connection`
    async fn connect(&self, url: &str) -> Result<Connection>;
}
