//! The device sandbox seam.

use crate::device::DeviceCore;
use crate::error::SandboxError;
use async_trait::async_trait;
use fwbatch_protocol::{EventSender, OperationDescriptor};
use tokio_util::sync::CancellationToken;

/// Out-of-process worker that generates and executes device operations.
///
/// Implementations typically wrap a subprocess speaking the JSON-lines format
/// of [`fwbatch_protocol`]; tests use scripted in-memory sandboxes.
#[async_trait]
pub trait DeviceSandbox: Send + Sync {
    /// Generate, without executing, the descriptor of one command.
    ///
    /// `args` are the command-specific arguments; see
    /// [`generate_arguments`](crate::generate_arguments) for the full
    /// argument list of a `--generate` invocation. Must not touch the device.
    async fn generate_descriptor(
        &self,
        command: &str,
        core: DeviceCore,
        args: &[String],
    ) -> Result<OperationDescriptor, SandboxError>;

    /// Execute a JSON-encoded batch against the device with `serial_number`.
    ///
    /// Task events must be sent on `events` strictly in operation order:
    /// begin, any progress, then end, one operation after the other. Resolves
    /// once every operation produced its terminal event; rejects on transport
    /// failure or with [`SandboxError::Cancelled`] once `cancel` fires.
    async fn execute_batch(
        &self,
        serial_number: &str,
        batch_json: &str,
        events: EventSender,
        cancel: CancellationToken,
    ) -> Result<(), SandboxError>;
}
