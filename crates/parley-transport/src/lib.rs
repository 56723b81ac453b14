//! # parley-transport
//!
//! Transport abstraction layer for the Parley chat hub.
//!
//! This crate provides a unified interface over message-framed transports:
//!
//! - **WebSocket** - axum upgraded sockets, the production transport
//! - **Memory** - an in-process pair for tests and benchmarks
//!
//! ## Transport Abstraction
//!
//! All transports implement [`Session`], which splits into a [`FrameSource`]
//! and a [`FrameSink`] so reads and writes can proceed concurrently.
//!
//! ```rust,ignore
//! use parley_transport::{FrameSource, Session};
//!
//! async fn handle(session: impl Session) {
//!     let (_sink, mut source) = session.split();
//!     while let Ok(Some(frame)) = source.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{FrameSink, FrameSource, Session, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketSession;
