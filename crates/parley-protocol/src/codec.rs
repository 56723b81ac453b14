//! Codec for encoding and decoding Parley envelopes.
//!
//! Envelopes travel as JSON text, one envelope per transport frame.

use bytes::Bytes;
use thiserror::Error;

use crate::envelope::Envelope;

/// Maximum encoded envelope size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Envelope is well-formed but its payload does not match its type tag.
    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload {
        /// Type tag of the offending envelope.
        kind: String,
        /// What was wrong.
        reason: String,
    },
}

/// Encode an envelope to a JSON frame.
///
/// # Errors
///
/// Returns an error if the envelope is too large or encoding fails.
pub fn encode(envelope: &Envelope) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(envelope)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    Ok(Bytes::from(payload))
}

/// Decode an envelope from a JSON frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or is not a valid envelope.
pub fn decode(data: &[u8]) -> Result<Envelope, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    Ok(serde_json::from_slice(data)?)
}
