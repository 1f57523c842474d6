//! The batch queue and its executor entry point.

use crate::callbacks::{Callbacks, Decoder, OperationHandler, TypedHandler, Wrapper};
use crate::config::BatchConfig;
use crate::descriptor::{build_descriptor, failed_descriptor, DescriptorFuture};
use crate::device::{Device, DeviceCore, DeviceTraits, Firmware, ProgrammingOptions, ResetKind};
use crate::error::{BatchError, Result};
use crate::executor::{CollectionRequest, Dispatcher, OperationState, StateObserver};
use crate::output::{
    DeviceCoreInfo, DeviceInfo, FirmwareBuffer, FwInfo, OperationKind, OperationOutput,
    ProtectionStatus,
};
use crate::sandbox::DeviceSandbox;
use crate::staging::StagedFile;
use base64::{engine::general_purpose, Engine as _};
use fwbatch_protocol::{event_channel, BatchRequest, TaskEnd};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

fn decode_unit(_: Option<Value>) -> std::result::Result<(), String> {
    Ok(())
}

fn decode_json<T: DeserializeOwned>(data: Option<Value>) -> std::result::Result<T, String> {
    let data = data.ok_or_else(|| "missing task payload".to_string())?;
    serde_json::from_value(data).map_err(|e| format!("invalid task payload: {e}"))
}

fn decode_firmware(data: Option<Value>) -> std::result::Result<Vec<u8>, String> {
    let payload: FirmwareBuffer = decode_json(data)?;
    general_purpose::STANDARD
        .decode(payload.buffer)
        .map_err(|e| format!("invalid base64 firmware: {e}"))
}

/// An enqueued operation waiting for `run`.
struct PendingOperation {
    kind: OperationKind,
    descriptor: DescriptorFuture,
    handler: Box<dyn OperationHandler>,
}

/// An ordered batch of device operations, executed by the sandbox in one go.
///
/// Operations are appended with the fluent methods and executed by
/// [`run`](Self::run). The enqueue order is the operation id.
///
/// ```ignore
/// let results = Batch::new(sandbox)
///     .erase(DeviceCore::Application, None)
///     .program(Firmware::buffer(image, FirmwareKind::Hex), DeviceCore::Application, None, None, None)
///     .collect(2, |ends| println!("{} operations done", ends.len()))
///     .reset(DeviceCore::Application, Some(ResetKind::ResetSystem), None)
///     .run(&device, CancellationToken::new())
///     .await?;
/// ```
pub struct Batch {
    sandbox: Arc<dyn DeviceSandbox>,
    config: BatchConfig,
    operations: Vec<PendingOperation>,
    collections: Vec<CollectionRequest>,
    observer: Option<StateObserver>,
}

impl Batch {
    /// Create an empty batch with the default configuration.
    pub fn new(sandbox: Arc<dyn DeviceSandbox>) -> Self {
        Self::with_config(sandbox, BatchConfig::default())
    }

    /// Create an empty batch with the given configuration.
    ///
    /// The configuration is validated when the batch is run.
    pub fn with_config(sandbox: Arc<dyn DeviceSandbox>, config: BatchConfig) -> Self {
        Self {
            sandbox,
            config,
            operations: Vec::new(),
            collections: Vec::new(),
            observer: None,
        }
    }

    /// Number of enqueued operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Check if no operation has been enqueued.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Commands of the enqueued operations, in order.
    pub fn kinds(&self) -> Vec<OperationKind> {
        self.operations.iter().map(|op| op.kind).collect()
    }

    fn enqueue<T: Send + 'static>(
        &mut self,
        kind: OperationKind,
        core: DeviceCore,
        args: Vec<String>,
        handler: TypedHandler<T>,
    ) {
        let operation_id = self.operations.len();
        tracing::trace!(operation_id, command = kind.command(), core = %core, "Operation enqueued");
        self.operations.push(PendingOperation {
            kind,
            descriptor: build_descriptor(Arc::clone(&self.sandbox), operation_id, kind, core, args),
            handler: Box::new(handler),
        });
    }

    fn enqueue_typed<T: Send + 'static>(
        mut self,
        kind: OperationKind,
        core: DeviceCore,
        args: Vec<String>,
        callbacks: Option<Callbacks<T>>,
        decode: Decoder<T>,
        wrap: Wrapper<T>,
    ) -> Self {
        let handler = TypedHandler::new(kind, callbacks.unwrap_or_default(), decode, wrap);
        self.enqueue(kind, core, args, handler);
        self
    }

    /// Erase the flash of `core`.
    pub fn erase(self, core: DeviceCore, callbacks: Option<Callbacks<()>>) -> Self {
        self.enqueue_typed(OperationKind::Erase, core, Vec::new(), callbacks, decode_unit, |()| {
            OperationOutput::Erase
        })
    }

    /// Program `firmware` onto `core`.
    ///
    /// In-memory firmware is staged to a temporary file now; the file is
    /// deleted when this operation ends or is aborted. If staging fails, the
    /// batch fails when it is run.
    pub fn program(
        mut self,
        firmware: Firmware,
        core: DeviceCore,
        options: Option<ProgrammingOptions>,
        traits: Option<&DeviceTraits>,
        callbacks: Option<Callbacks<()>>,
    ) -> Self {
        let kind = OperationKind::Program;
        let mut handler = TypedHandler::new(kind, callbacks.unwrap_or_default(), decode_unit, |()| {
            OperationOutput::Program
        });

        let firmware_path = match firmware {
            Firmware::Path(path) => path.to_string_lossy().into_owned(),
            Firmware::Buffer { bytes, kind: fw_kind } => {
                match StagedFile::create(
                    &self.config.staging_dir,
                    fw_kind.extension(),
                    &bytes,
                    self.config.staging_attempts,
                ) {
                    Ok(staged) => {
                        let path = staged.path().to_string_lossy().into_owned();
                        handler = handler.with_staged(staged);
                        path
                    }
                    Err(e) => {
                        let operation_id = self.operations.len();
                        tracing::warn!(operation_id, error = %e, "Failed to stage firmware");
                        self.operations.push(PendingOperation {
                            kind,
                            descriptor: failed_descriptor(BatchError::Staging(e)),
                            handler: Box::new(handler),
                        });
                        return self;
                    }
                }
            }
        };

        let mut args = vec!["--firmware".to_string(), firmware_path];
        if let Some(traits) = traits {
            args.extend(traits.to_args());
        }
        if let Some(options) = options {
            args.extend(options.to_args());
        }

        self.enqueue(kind, core, args, handler);
        self
    }

    /// Reset `core`, optionally with a specific reset kind.
    pub fn reset(
        self,
        core: DeviceCore,
        reset_kind: Option<ResetKind>,
        callbacks: Option<Callbacks<()>>,
    ) -> Self {
        let args = reset_kind
            .map(|k| vec!["--reset-kind".to_string(), k.as_str().to_string()])
            .unwrap_or_default();
        self.enqueue_typed(OperationKind::Reset, core, args, callbacks, decode_unit, |()| {
            OperationOutput::Reset
        })
    }

    /// Recover `core`, erasing it and lifting readback protection.
    pub fn recover(self, core: DeviceCore, callbacks: Option<Callbacks<()>>) -> Self {
        self.enqueue_typed(OperationKind::Recover, core, Vec::new(), callbacks, decode_unit, |()| {
            OperationOutput::Recover
        })
    }

    /// Read the firmware of `core`.
    ///
    /// The base64 payload is decoded before `on_task_end` sees it. A failed
    /// read, or one without decodable data, is reported through
    /// `on_exception` with [`BatchError::ReadFailed`] instead.
    pub fn read_firmware(mut self, core: DeviceCore, callbacks: Option<Callbacks<Vec<u8>>>) -> Self {
        let kind = OperationKind::ReadFirmware;
        let handler = TypedHandler::new(
            kind,
            callbacks.unwrap_or_default(),
            decode_firmware,
            OperationOutput::FirmwareRead,
        )
        .failure_as_exception(|| BatchError::ReadFailed);
        self.enqueue(kind, core, Vec::new(), handler);
        self
    }

    /// Query the memory layout of `core`.
    pub fn get_core_info(self, core: DeviceCore, callbacks: Option<Callbacks<DeviceCoreInfo>>) -> Self {
        self.enqueue_typed(
            OperationKind::CoreInfo,
            core,
            Vec::new(),
            callbacks,
            decode_json,
            OperationOutput::CoreInfo,
        )
    }

    /// Query the firmware images on `core`.
    pub fn get_fw_info(self, core: DeviceCore, callbacks: Option<Callbacks<FwInfo>>) -> Self {
        self.enqueue_typed(
            OperationKind::FwInfo,
            core,
            Vec::new(),
            callbacks,
            decode_json,
            OperationOutput::FwInfo,
        )
    }

    /// Query hardware and probe details.
    pub fn get_device_info(self, core: DeviceCore, callbacks: Option<Callbacks<DeviceInfo>>) -> Self {
        self.enqueue_typed(
            OperationKind::DeviceInfo,
            core,
            Vec::new(),
            callbacks,
            decode_json,
            OperationOutput::DeviceInfo,
        )
    }

    /// Query the readback protection of `core`.
    pub fn get_protection_status(
        self,
        core: DeviceCore,
        callbacks: Option<Callbacks<ProtectionStatus>>,
    ) -> Self {
        self.enqueue_typed(
            OperationKind::ProtectionStatus,
            core,
            Vec::new(),
            callbacks,
            decode_json,
            OperationOutput::ProtectionStatus,
        )
    }

    /// Call `callback` with the last `count` results once the most recently
    /// enqueued operation has ended.
    ///
    /// Has no effect if no operation has been enqueued yet.
    pub fn collect(
        mut self,
        count: usize,
        callback: impl FnMut(&[TaskEnd<OperationOutput>]) + Send + 'static,
    ) -> Self {
        match self.operations.len().checked_sub(1) {
            Some(operation_index) => self.collections.push(CollectionRequest {
                operation_index,
                count,
                callback: Box::new(callback),
            }),
            None => tracing::warn!(count, "collect registered on an empty batch, ignoring"),
        }
        self
    }

    /// Report every state transition of the operations during `run`.
    ///
    /// All operations start out [`OperationState::Queued`]. The observer sees
    /// `DescriptorPending` and `Ready` for each of them around descriptor
    /// generation, then `Running` and a terminal state as the sandbox works.
    pub fn on_state_change(
        mut self,
        observer: impl FnMut(usize, OperationState) + Send + 'static,
    ) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Execute every enqueued operation on `device`.
    ///
    /// All descriptors are generated first; if any generation failed nothing
    /// is submitted. Task events are then dispatched to the operations'
    /// callbacks in order while the sandbox runs.
    ///
    /// # Returns
    ///
    /// One output per operation, in enqueue order.
    ///
    /// # Errors
    ///
    /// - [`BatchError::InvalidConfig`] or [`BatchError::MissingSerialNumber`]
    ///   before contacting the sandbox
    /// - [`BatchError::Build`] or [`BatchError::Staging`] before submission
    /// - [`BatchError::TaskFailures`] if any task failed
    /// - [`BatchError::Sandbox`] or [`BatchError::Cancelled`] if execution
    ///   itself failed; the in-flight operation gets `on_exception` first
    pub async fn run(
        self,
        device: &Device,
        cancel: CancellationToken,
    ) -> Result<Vec<OperationOutput>> {
        self.config.validate()?;
        let serial_number = device
            .serial_number
            .as_deref()
            .ok_or(BatchError::MissingSerialNumber)?;

        let start = Instant::now();
        let Batch {
            sandbox,
            config,
            operations,
            collections,
            mut observer,
        } = self;
        let mut report = |index: usize, state: OperationState| {
            if let Some(observe) = observer.as_mut() {
                observe(index, state);
            }
        };
        let count = operations.len();
        tracing::info!(serial_number = %serial_number, operations = count, "Running batch");

        let (builds, handlers): (Vec<_>, Vec<_>) = operations
            .into_iter()
            .map(|op| (op.descriptor, op.handler))
            .unzip();

        (0..count).for_each(|i| report(i, OperationState::DescriptorPending));
        let descriptors = match futures::future::try_join_all(builds).await {
            Ok(descriptors) => descriptors,
            Err(e) => {
                if let BatchError::Build { operation_id, .. } = &e {
                    report(*operation_id, OperationState::Failed);
                }
                return Err(e);
            }
        };
        (0..count).for_each(|i| report(i, OperationState::Ready));
        let request = BatchRequest::from_descriptors(descriptors);
        let batch_json = request.to_json()?;
        tracing::debug!(
            serial_number = %serial_number,
            operations = count,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Descriptors ready, submitting batch"
        );

        let mut dispatcher = Dispatcher::new(handlers, collections, config.verify_operation_ids)
            .with_observer(observer);
        let (events, mut receiver) = event_channel();
        // Cancelled on our own aborts too, so the sandbox stops working.
        let sandbox_cancel = cancel.child_token();
        let execution =
            sandbox.execute_batch(serial_number, &batch_json, events, sandbox_cancel.clone());
        tokio::pin!(execution);

        let mut rejected = false;
        let mut outcome: Result<()> = loop {
            tokio::select! {
                biased;

                Some(event) = receiver.recv() => {
                    if let Err(e) = dispatcher.dispatch(event) {
                        rejected = true;
                        break Err(e);
                    }
                }

                result = &mut execution => break result.map_err(BatchError::from),

                _ = cancel.cancelled() => break Err(BatchError::Cancelled),
            }
        };

        // Events the sandbox queued before its call returned or failed.
        if !rejected {
            while let Ok(event) = receiver.try_recv() {
                if let Err(e) = dispatcher.dispatch(event) {
                    rejected = true;
                    if outcome.is_ok() {
                        outcome = Err(e);
                    }
                    break;
                }
            }
        }
        if rejected {
            sandbox_cancel.cancel();
        }

        let result = match outcome {
            Ok(()) => dispatcher.finish(),
            Err(error) => {
                dispatcher.fail_in_flight(&error);
                Err(error)
            }
        };

        match &result {
            Ok(outputs) => tracing::info!(
                serial_number = %serial_number,
                operations = outputs.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Batch completed"
            ),
            Err(e) => tracing::warn!(
                serial_number = %serial_number,
                error = %e,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Batch failed"
            ),
        }
        result
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("config", &self.config)
            .field("operations", &self.kinds())
            .field("collections", &self.collections.len())
            .field("observer", &self.observer.is_some())
            .finish()
    }
}
