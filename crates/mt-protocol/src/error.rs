//! Protocol error types

use thiserror::Error;

/// Errors that can occur while decoding a topic payload
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Payload is not a valid JSON record
    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The `type` field names a kind this agent does not handle
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    /// A resize message without usable dimensions
    #[error("Invalid resize: {rows}x{cols}")]
    InvalidResize { rows: u16, cols: u16 },
}
