//! WebSocket transport backed by tokio-tungstenite

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::{Connection, Connector, Disconnect, Frame, FrameSink, FrameStream};
use crate::error::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects over `ws://` or `wss://`
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    /// Create a connector with the given TCP+TLS+upgrade timeout
    pub fn new(connect_timeout: Duration) -> Self {
        WsConnector { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Connection> {
        debug!(url = %url, "Opening WebSocket connection");

        let (stream, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(url))
                .await
                .map_err(|_| {
                    Error::Timeout(format!(
                        "Timed out connecting to {} after {:?}",
                        url, self.connect_timeout
                    ))
                })?
                .map_err(|e| Error::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        let (write, read) = stream.split();
        Ok(Connection {
            sink: Box::new(WsSink { inner: write }),
            stream: Box::new(WsFrameStream {
                inner: read,
                finished: None,
            }),
        })
    }
}

struct WsSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(bytes) => Message::Binary(bytes.into()),
        };
        self.inner
            .send(message)
            .await
            .map_err(|e| Error::Send(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        // The peer may already be gone; a failed close frame is not an error worth surfacing.
        let _ = self.inner.send(Message::Close(Some(frame))).await;
        self.inner.close().await?;
        Ok(())
    }
}

struct WsFrameStream {
    inner: SplitStream<WsStream>,
    finished: Option<Disconnect>,
}

#[async_trait]
impl FrameStream for WsFrameStream {
    async fn receive(&mut self) -> std::result::Result<Frame, Disconnect> {
        if let Some(disconnect) = &self.finished {
            return Err(disconnect.clone());
        }

        let disconnect = loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Frame::Text(text.as_str().to_owned())),
                Some(Ok(Message::Binary(bytes))) => return Ok(Frame::Binary(bytes.to_vec())),
                // tungstenite answers pings itself
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {
                    continue
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => Disconnect::with_code(u16::from(frame.code), frame.reason.as_str()),
                        None => Disconnect::abrupt("closed without a close frame"),
                    };
                }
                Some(Err(e)) => break Disconnect::abrupt(e.to_string()),
                None => break Disconnect::abrupt("stream ended"),
            }
        };

        self.finished = Some(disconnect.clone());
        Err(disconnect)
    }
}
