//! Error types for the shadow protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding shadow documents.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Payload is not valid JSON for the expected document.
    #[error("invalid document: {0}")]
    Json(#[from] serde_json::Error),

    /// Topic does not belong to the shadow.
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
}
