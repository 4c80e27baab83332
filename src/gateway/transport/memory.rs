//! In-process transport
//!
//! [`MemoryConnector`] hands every connection to a [`MemoryGateway`], where a
//! test (or an offline harness) plays the remote endpoint through a
//! [`MemoryPeer`].

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::{Connection, Connector, Disconnect, Frame, FrameSink, FrameStream};
use crate::error::{Error, Result};
use crate::gateway::protocol::{Codec, Envelope, JsonCodec};

/// What the client did on a connection, as seen by the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// The client sent a frame
    Frame(Frame),
    /// The client closed the connection
    Closed { code: u16, reason: String },
}

type ToClient = std::result::Result<Frame, Disconnect>;

#[derive(Default)]
struct Shared {
    refusals: AtomicUsize,
    attempts: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

/// Client side: plug into the engine in place of [`super::WsConnector`]
#[derive(Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    shared: Arc<Shared>,
}

/// Remote side: accepts connections opened through the paired connector
pub struct MemoryGateway {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
    shared: Arc<Shared>,
}

impl MemoryConnector {
    /// Create a connected connector/gateway pair
    pub fn pair() -> (MemoryConnector, MemoryGateway) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        (
            MemoryConnector {
                accept_tx,
                shared: shared.clone(),
            },
            MemoryGateway { accept_rx, shared },
        )
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Connection> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut urls) = self.shared.urls.lock() {
            urls.push(url.to_string());
        }

        let refused = self
            .shared
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(Error::Connection(format!("Connection to {} refused", url)));
        }

        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let (server_tx, server_rx) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            url: url.to_string(),
            from_client: client_rx,
            to_client: server_tx,
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| Error::Connection("Memory gateway is gone".to_string()))?;

        Ok(Connection {
            sink: Box::new(MemorySink { tx: client_tx }),
            stream: Box::new(MemoryStream {
                rx: server_rx,
                finished: None,
            }),
        })
    }
}

impl MemoryGateway {
    /// Wait for the next client connection
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// Refuse the next `count` connection attempts
    pub fn refuse_next(&self, count: usize) {
        self.shared.refusals.store(count, Ordering::SeqCst);
    }

    /// Number of connection attempts, refused ones included
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// URLs the client connected to, in order
    pub fn urls(&self) -> Vec<String> {
        self.shared
            .urls
            .lock()
            .map(|urls| urls.clone())
            .unwrap_or_default()
    }
}

/// One accepted connection, seen from the remote side
pub struct MemoryPeer {
    /// URL the client asked for
    pub url: String,
    from_client: mpsc::UnboundedReceiver<PeerEvent>,
    to_client: mpsc::UnboundedSender<ToClient>,
}

impl MemoryPeer {
    /// Deliver a frame to the client; returns false once the client dropped the stream
    pub fn send(&self, frame: Frame) -> bool {
        self.to_client.send(Ok(frame)).is_ok()
    }

    /// Deliver an envelope encoded as JSON
    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        match JsonCodec.encode(envelope) {
            Ok(frame) => self.send(frame),
            Err(_) => false,
        }
    }

    /// Close the connection from the remote side
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.to_client.send(Err(Disconnect::with_code(code, reason)));
    }

    /// Drop the connection without a close code
    pub fn drop_connection(&self) {
        let _ = self.to_client.send(Err(Disconnect::abrupt("connection reset")));
    }

    /// Next thing the client did; None once the client side is gone
    pub async fn recv(&mut self) -> Option<PeerEvent> {
        self.from_client.recv().await
    }

    /// Next envelope the client sent; None on close or undecodable frames
    pub async fn recv_envelope(&mut self) -> Option<Envelope> {
        match self.recv().await? {
            PeerEvent::Frame(frame) => JsonCodec.decode(&frame).ok(),
            PeerEvent::Closed { .. } => None,
        }
    }
}

struct MemorySink {
    tx: mpsc::UnboundedSender<PeerEvent>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.tx
            .send(PeerEvent::Frame(frame))
            .map_err(|_| Error::Send("Peer is gone".to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        self.tx
            .send(PeerEvent::Closed {
                code,
                reason: reason.to_string(),
            })
            .map_err(|_| Error::Send("Peer is gone".to_string()))
    }
}

struct MemoryStream {
    rx: mpsc::UnboundedReceiver<ToClient>,
    finished: Option<Disconnect>,
}

#[async_trait]
impl FrameStream for MemoryStream {
    async fn receive(&mut self) -> std::result::Result<Frame, Disconnect> {
        if let Some(disconnect) = &self.finished {
            return Err(disconnect.clone());
        }
        let disconnect = match self.rx.recv().await {
            Some(Ok(frame)) => return Ok(frame),
            Some(Err(disconnect)) => disconnect,
            None => Disconnect::abrupt("peer dropped"),
        };
        self.finished = Some(disconnect.clone());
        Err(disconnect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (connector, mut gateway) = MemoryConnector::pair();
        let mut connection = connector.connect("memory://gateway").await.unwrap();
        let mut peer = gateway.accept().await.unwrap();
        assert_eq!(peer.url, "memory://gateway");

        connection.sink.send(Frame::Text("ping".into())).await.unwrap();
        assert_eq!(peer.recv().await, Some(PeerEvent::Frame(Frame::Text("ping".into()))));

        assert!(peer.send(Frame::Text("pong".into())));
        assert_eq!(connection.stream.receive().await, Ok(Frame::Text("pong".into())));
    }

    #[tokio::test]
    async fn test_close_is_sticky() {
        let (connector, mut gateway) = MemoryConnector::pair();
        let mut connection = connector.connect("memory://gateway").await.unwrap();
        let peer = gateway.accept().await.unwrap();

        peer.close(4009, "session timed out");
        let first = connection.stream.receive().await.unwrap_err();
        let second = connection.stream.receive().await.unwrap_err();
        assert_eq!(first.code, Some(4009));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_refusals_count_down() {
        let (connector, gateway) = MemoryConnector::pair();
        gateway.refuse_next(2);

        assert!(connector.connect("memory://a").await.is_err());
        assert!(connector.connect("memory://b").await.is_err());
        assert!(connector.connect("memory://c").await.is_ok());
        assert_eq!(gateway.attempts(), 3);
        assert_eq!(gateway.urls(), vec!["memory://a", "memory://b", "memory://c"]);
    }

    #[tokio::test]
    async fn test_dropped_peer_fails_send() {
        let (connector, mut gateway) = MemoryConnector::pair();
        let mut connection = connector.connect("memory://gateway").await.unwrap();
        drop(gateway.accept().await.unwrap());

        assert!(matches!(
            connection.sink.send(Frame::Text("late".into())).await,
            Err(Error::Send(_))
        ));
        assert!(connection.stream.receive().await.is_err());
    }
}
