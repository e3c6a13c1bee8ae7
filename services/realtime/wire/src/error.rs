//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Unknown protocol action
    #[error("unknown action {0}")]
    Action(u8),

    /// Unknown frame body format
    #[error("unknown format {0}")]
    Format(u8),

    /// JSON body could not be encoded or decoded
    #[error("json body invalid: {0}")]
    Json(#[from] serde_json::Error),

    /// CBOR body could not be encoded or decoded
    #[error("cbor body invalid: {0}")]
    Cbor(String),

    /// Payload encoding chain failure
    #[error("payload encoding {encoding}: {reason}")]
    Encoding {
        /// Encoding step that failed
        encoding: String,
        /// What went wrong
        reason: String,
    },

    /// Malformed frame structure
    #[error("malformed frame")]
    Malformed,
}
