//! In-memory transport.
//!
//! [`pair`] returns a server-side [`MemorySession`] and the [`MemoryPeer`]
//! that plays the client. Used by tests and benchmarks to drive connection
//! agents without a network.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::traits::{FrameSink, FrameSource, Session, TransportError};

enum PeerFrame {
    Data(Bytes),
    Fail(String),
}

/// Create a connected session/peer pair.
#[must_use]
pub fn pair() -> (MemorySession, MemoryPeer) {
    let (to_server, from_peer) = mpsc::unbounded_channel();
    let (to_peer, from_server) = mpsc::unbounded_channel();

    (
        MemorySession {
            inbound: from_peer,
            outbound: to_peer,
        },
        MemoryPeer {
            outbound: Some(to_server),
            inbound: from_server,
        },
    )
}

/// Server side of an in-memory connection.
pub struct MemorySession {
    inbound: mpsc::UnboundedReceiver<PeerFrame>,
    outbound: mpsc::UnboundedSender<Bytes>,
}

impl Session for MemorySession {
    type Source = MemorySource;
    type Sink = MemorySink;

    fn split(self) -> (Self::Sink, Self::Source) {
        (
            MemorySink {
                outbound: Some(self.outbound),
            },
            MemorySource {
                inbound: self.inbound,
            },
        )
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }
}

/// Receiving half of a [`MemorySession`].
pub struct MemorySource {
    inbound: mpsc::UnboundedReceiver<PeerFrame>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self.inbound.recv().await {
            Some(PeerFrame::Data(data)) => Ok(Some(data)),
            Some(PeerFrame::Fail(reason)) => Err(TransportError::ReceiveFailed(reason)),
            None => Ok(None),
        }
    }
}

/// Sending half of a [`MemorySession`].
pub struct MemorySink {
    outbound: Option<mpsc::UnboundedSender<Bytes>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?;
        outbound
            .send(frame)
            .map_err(|_| TransportError::SendFailed("peer dropped".into()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.outbound = None;
        Ok(())
    }
}

/// Client side of an in-memory connection.
pub struct MemoryPeer {
    outbound: Option<mpsc::UnboundedSender<PeerFrame>>,
    inbound: mpsc::UnboundedReceiver<Bytes>,
}

impl MemoryPeer {
    /// Send a frame to the server.
    ///
    /// Returns `false` if the session is gone.
    pub fn send(&self, frame: impl Into<Bytes>) -> bool {
        self.push(PeerFrame::Data(frame.into()))
    }

    /// Make the server's next receive fail.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.push(PeerFrame::Fail(reason.into()))
    }

    /// Close the connection from the client side.
    pub fn disconnect(&mut self) {
        self.outbound = None;
    }

    /// Receive the next frame from the server.
    ///
    /// Returns `None` once the server has closed the connection.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.inbound.recv().await
    }

    /// Receive a frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.inbound.try_recv().ok()
    }

    fn push(&self, frame: PeerFrame) -> bool {
        self.outbound
            .as_ref()
            .map(|tx| tx.send(frame).is_ok())
            .unwrap_or(false)
    }
}
