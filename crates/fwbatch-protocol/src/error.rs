//! Error types for fwbatch-protocol.

use thiserror::Error;

/// Errors raised while decoding sandbox output.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A line of sandbox output was not a valid message.
    #[error("malformed sandbox message on line {line}: {source}")]
    Malformed {
        /// 1-based line number in the stream.
        line: usize,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },

    /// A descriptor was not a JSON object.
    #[error("descriptor must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
