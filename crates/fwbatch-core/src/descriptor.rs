//! Descriptor generation for queued operations.

use crate::device::DeviceCore;
use crate::error::{BatchError, Result};
use crate::output::OperationKind;
use crate::sandbox::DeviceSandbox;
use fwbatch_protocol::OperationDescriptor;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;

/// A descriptor that may still be generating.
pub(crate) type DescriptorFuture = BoxFuture<'static, Result<OperationDescriptor>>;

/// Full argument list of a `--generate` invocation for `core`.
pub fn generate_arguments(core: DeviceCore, args: &[String]) -> Vec<String> {
    let mut full = Vec::with_capacity(args.len() + 3);
    full.push("--generate".to_string());
    full.push("--core".to_string());
    full.push(core.as_str().to_string());
    full.extend_from_slice(args);
    full
}

/// Ask the sandbox for the descriptor of operation `operation_id`.
///
/// The returned future is lazy; it is polled when the batch joins all
/// descriptors. A failure is tagged with the operation's position and command.
pub(crate) fn build_descriptor(
    sandbox: Arc<dyn DeviceSandbox>,
    operation_id: usize,
    kind: OperationKind,
    core: DeviceCore,
    args: Vec<String>,
) -> DescriptorFuture {
    async move {
        let command = kind.command();
        tracing::debug!(operation_id, command, core = %core, "Generating descriptor");
        sandbox
            .generate_descriptor(command, core, &args)
            .await
            .map_err(|source| {
                tracing::warn!(operation_id, command, error = %source, "Descriptor generation failed");
                BatchError::Build {
                    operation_id,
                    command,
                    source,
                }
            })
    }
    .boxed()
}

/// A build that has already failed, e.g. because staging failed.
pub(crate) fn failed_descriptor(error: BatchError) -> DescriptorFuture {
    futures::future::ready(Err(error)).boxed()
}
