//! Error types for fwbatch-core.

use fwbatch_protocol::ProtocolError;
use std::fmt;
use thiserror::Error;

/// Result type alias for fwbatch-core operations.
pub type Result<T> = std::result::Result<T, BatchError>;

/// Errors reported by a [`DeviceSandbox`](crate::DeviceSandbox) implementation.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The sandbox could not be reached or died mid-call.
    #[error("transport failed: {0}")]
    Transport(String),

    /// The sandbox refused the command.
    #[error("sandbox error {code}: {message}")]
    Rejected {
        /// Error code from the sandbox
        code: i64,
        /// Error message from the sandbox
        message: String,
    },

    /// The call was cancelled through its cancellation token.
    #[error("cancelled")]
    Cancelled,

    /// The sandbox produced output that could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One failed task of an executed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// Position of the operation in the batch.
    pub operation_id: usize,
    /// Sandbox command of the operation.
    pub command: &'static str,
    /// Error code reported by the sandbox.
    pub code: Option<i64>,
    /// Message reported by the sandbox.
    pub message: Option<String>,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation {} ({}): error: ", self.operation_id, self.command)?;
        match self.code {
            Some(code) => write!(f, "{code}")?,
            None => write!(f, "unknown")?,
        }
        write!(f, ", message: {}", self.message.as_deref().unwrap_or(""))
    }
}

fn join_failures(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Errors that can occur while building or running a batch.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The target device has no serial number.
    #[error("device does not have a serial number, no device operation is possible")]
    MissingSerialNumber,

    /// The sandbox failed to generate a descriptor.
    #[error("failed to generate descriptor for operation {operation_id} ({command}): {source}")]
    Build {
        /// Position of the operation in the batch
        operation_id: usize,
        /// Sandbox command of the operation
        command: &'static str,
        /// Underlying sandbox error
        #[source]
        source: SandboxError,
    },

    /// Firmware could not be written to a temporary file.
    #[error("failed to stage firmware: {0}")]
    Staging(#[source] std::io::Error),

    /// The batch request could not be encoded.
    #[error("failed to encode batch request: {0}")]
    Encode(#[from] ProtocolError),

    /// One or more tasks failed inside an executed batch.
    #[error("batch failed: {}", join_failures(.0))]
    TaskFailures(Vec<TaskFailure>),

    /// A firmware read did not produce any data.
    #[error("Read failed")]
    ReadFailed,

    /// The sandbox finished without reporting every operation.
    #[error("batch incomplete: {completed} of {expected} operations reported a result")]
    Incomplete {
        /// Number of operations submitted
        expected: usize,
        /// Number of task ends observed
        completed: usize,
    },

    /// A task event carried an operation id other than the tracked one.
    #[error("out-of-order task event: expected operation {expected}, got {actual}")]
    OutOfOrder {
        /// Operation index tracked by the executor
        expected: usize,
        /// Operation id carried by the event
        actual: String,
    },

    /// The sandbox call itself failed.
    #[error("sandbox error: {0}")]
    Sandbox(#[source] SandboxError),

    /// The batch was cancelled.
    #[error("batch cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<SandboxError> for BatchError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::Cancelled => Self::Cancelled,
            other => Self::Sandbox(other),
        }
    }
}
