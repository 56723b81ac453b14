//! Transport abstraction traits for Parley.
//!
//! A [`Session`] is one long-lived, bidirectional, message-framed connection.
//! It splits into a [`FrameSource`] and a [`FrameSink`] so that reading and
//! writing can run as independent tasks.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// The receiving half of a session.
#[async_trait]
pub trait FrameSource: Send {
    /// Receive the next frame payload.
    ///
    /// Returns `Ok(None)` if the peer closed the connection cleanly.
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// The sending half of a session.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one frame payload.
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Perform the close handshake.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// An established transport session.
pub trait Session: Send + 'static {
    /// Receiving half.
    type Source: FrameSource + 'static;
    /// Sending half.
    type Sink: FrameSink + 'static;

    /// Split the session into its sending and receiving halves.
    fn split(self) -> (Self::Sink, Self::Source);

    /// Get the remote address of the session, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}
