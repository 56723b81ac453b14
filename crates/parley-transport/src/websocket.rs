//! WebSocket transport implementation.
//!
//! Adapts an upgraded axum [`WebSocket`] to the [`Session`] traits.
//! Envelopes are written as text frames; binary frames are accepted on read.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tracing::{debug, warn};

use crate::traits::{FrameSink, FrameSource, Session, TransportError};

/// Default maximum inbound frame size (64 KiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// An upgraded WebSocket session.
pub struct WebSocketSession {
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
    max_message_size: usize,
}

impl WebSocketSession {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        Self {
            socket,
            remote_addr: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Record the peer address.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Set the maximum inbound frame size.
    ///
    /// Larger frames are skipped by [`WebSocketSource`]. The upgrade's own
    /// message limit must sit above this one, or the socket fails first.
    #[must_use]
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }
}

impl Session for WebSocketSession {
    type Source = WebSocketSource;
    type Sink = WebSocketSink;

    fn split(self) -> (Self::Sink, Self::Source) {
        let (sink, stream) = self.socket.split();
        (
            WebSocketSink { sink, closed: false },
            WebSocketSource {
                stream,
                max_message_size: self.max_message_size,
            },
        )
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }
}

/// Receiving half of a [`WebSocketSession`].
pub struct WebSocketSource {
    stream: SplitStream<WebSocket>,
    max_message_size: usize,
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            let data = match self.stream.next().await {
                Some(Ok(Message::Text(text))) => Bytes::from(text),
                Some(Ok(Message::Binary(data))) => Bytes::from(data),
                // Pings are answered by the socket itself.
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Received close frame");
                    return Ok(None);
                }
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    return Ok(None);
                }
            };

            // Oversized frames are dropped; the connection stays open.
            if data.len() > self.max_message_size {
                warn!(
                    "Dropping message too large: {} bytes (max: {})",
                    data.len(),
                    self.max_message_size
                );
                continue;
            }

            return Ok(Some(data));
        }
    }
}

/// Sending half of a [`WebSocketSession`].
pub struct WebSocketSink {
    sink: SplitSink<WebSocket, Message>,
    closed: bool,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }

        let text = String::from_utf8(frame.to_vec())
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.sink
            .close()
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {}", e)))
    }
}
