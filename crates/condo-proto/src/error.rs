//! Decode errors for gateway and REST payloads.

use thiserror::Error;

/// Errors raised while decoding wire payloads.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The JSON itself failed to parse or map onto the expected shape.
    #[error("json decode error: {0}")]
    Json(#[from] serde_json::Error),

    /// A structurally-required field was absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// The payload had an opcode/type combination we cannot interpret.
    #[error("unexpected payload: {0}")]
    UnexpectedPayload(String),
}
