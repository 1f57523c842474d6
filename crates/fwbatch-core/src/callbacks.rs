//! Per-operation lifecycle callbacks.

use crate::error::BatchError;
use crate::output::{OperationKind, OperationOutput};
use crate::staging::StagedFile;
use fwbatch_protocol::{Progress, TaskBegin, TaskEnd, TaskInfo};
use serde_json::Value;
use std::fmt;

/// Error code given to a successful task whose payload did not decode.
pub const PAYLOAD_DECODE_ERROR: i64 = -1;

type ProgressFn = Box<dyn FnMut(&Progress, &TaskInfo) + Send>;
type TaskBeginFn = Box<dyn FnMut(&TaskBegin) + Send>;
type TaskEndFn<T> = Box<dyn FnMut(&TaskEnd<T>) + Send>;
type ExceptionFn = Box<dyn FnMut(&BatchError) + Send>;

/// Handlers for the lifecycle events of one queued operation.
///
/// `T` is the decoded payload of the operation's task end, e.g. `Vec<u8>`
/// for a firmware read or `()` for an erase. All handlers are optional.
///
/// ```ignore
/// let callbacks = Callbacks::new()
///     .on_progress(|progress, _task| println!("{}%", progress.progress_percentage))
///     .on_task_end(|end: &TaskEnd<Vec<u8>>| println!("read {:?} bytes", end.data.as_ref().map(Vec::len)));
/// ```
pub struct Callbacks<T> {
    on_progress: Option<ProgressFn>,
    on_task_begin: Option<TaskBeginFn>,
    on_task_end: Option<TaskEndFn<T>>,
    on_exception: Option<ExceptionFn>,
}

impl<T> Default for Callbacks<T> {
    fn default() -> Self {
        Self {
            on_progress: None,
            on_task_begin: None,
            on_task_end: None,
            on_exception: None,
        }
    }
}

impl<T> Callbacks<T> {
    /// Create an empty callback set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called for each progress report of the running task.
    pub fn on_progress(mut self, f: impl FnMut(&Progress, &TaskInfo) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    /// Called when the task starts.
    pub fn on_task_begin(mut self, f: impl FnMut(&TaskBegin) + Send + 'static) -> Self {
        self.on_task_begin = Some(Box::new(f));
        self
    }

    /// Called when the task ends, successfully or not.
    pub fn on_task_end(mut self, f: impl FnMut(&TaskEnd<T>) + Send + 'static) -> Self {
        self.on_task_end = Some(Box::new(f));
        self
    }

    /// Called when the operation is aborted or the batch fails while it is current.
    pub fn on_exception(mut self, f: impl FnMut(&BatchError) + Send + 'static) -> Self {
        self.on_exception = Some(Box::new(f));
        self
    }
}

impl<T> fmt::Debug for Callbacks<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_task_begin", &self.on_task_begin.is_some())
            .field("on_task_end", &self.on_task_end.is_some())
            .field("on_exception", &self.on_exception.is_some())
            .finish()
    }
}

/// Type-erased view of an operation, driven by the executor.
pub(crate) trait OperationHandler: Send {
    fn kind(&self) -> OperationKind;

    fn progress(&mut self, progress: &Progress, task: &TaskInfo);

    fn task_begin(&mut self, begin: &TaskBegin);

    /// Decode and deliver a task end, returning the record kept in the
    /// batch results.
    fn task_end(&mut self, end: TaskEnd) -> TaskEnd<OperationOutput>;

    /// Deliver an exception. At most one is delivered per operation.
    fn exception(&mut self, error: &BatchError);
}

/// Decodes a successful task-end payload.
pub(crate) type Decoder<T> = fn(Option<Value>) -> Result<T, String>;

/// Wraps a decoded payload into the batch-wide output type.
pub(crate) type Wrapper<T> = fn(T) -> OperationOutput;

/// [`OperationHandler`] for an operation with payload type `T`.
pub(crate) struct TypedHandler<T> {
    kind: OperationKind,
    callbacks: Callbacks<T>,
    decode: Decoder<T>,
    wrap: Wrapper<T>,
    /// Report failed task ends as an exception instead of a task end.
    failure_as_exception: Option<fn() -> BatchError>,
    staged: Option<StagedFile>,
    exception_delivered: bool,
}

impl<T> TypedHandler<T> {
    pub(crate) fn new(
        kind: OperationKind,
        callbacks: Callbacks<T>,
        decode: Decoder<T>,
        wrap: Wrapper<T>,
    ) -> Self {
        Self {
            kind,
            callbacks,
            decode,
            wrap,
            failure_as_exception: None,
            staged: None,
            exception_delivered: false,
        }
    }

    /// Convert failed task ends into the given exception.
    pub(crate) fn failure_as_exception(mut self, error: fn() -> BatchError) -> Self {
        self.failure_as_exception = Some(error);
        self
    }

    /// Take ownership of a staged file, released on the first terminal signal.
    pub(crate) fn with_staged(mut self, staged: StagedFile) -> Self {
        self.staged = Some(staged);
        self
    }

    fn release_staged(&mut self) {
        if let Some(mut staged) = self.staged.take() {
            staged.release();
        }
    }
}

impl<T: Send> OperationHandler for TypedHandler<T> {
    fn kind(&self) -> OperationKind {
        self.kind
    }

    fn progress(&mut self, progress: &Progress, task: &TaskInfo) {
        if let Some(f) = self.callbacks.on_progress.as_mut() {
            f(progress, task);
        }
    }

    fn task_begin(&mut self, begin: &TaskBegin) {
        if let Some(f) = self.callbacks.on_task_begin.as_mut() {
            f(begin);
        }
    }

    fn task_end(&mut self, end: TaskEnd) -> TaskEnd<OperationOutput> {
        self.release_staged();

        let (mut typed, data) = end.take_data::<T>();
        if typed.is_success() {
            match (self.decode)(data) {
                Ok(value) => typed.data = Some(value),
                Err(reason) => {
                    tracing::warn!(command = self.kind.command(), reason = %reason, "Undecodable task payload");
                    typed = typed.into_failure(PAYLOAD_DECODE_ERROR, reason);
                }
            }
        }

        match self.failure_as_exception {
            Some(error) if !typed.is_success() => self.exception(&error()),
            _ => {
                if let Some(f) = self.callbacks.on_task_end.as_mut() {
                    f(&typed);
                }
            }
        }

        typed.map_data(self.wrap)
    }

    fn exception(&mut self, error: &BatchError) {
        self.release_staged();
        if self.exception_delivered {
            return;
        }
        self.exception_delivered = true;
        if let Some(f) = self.callbacks.on_exception.as_mut() {
            f(error);
        }
    }
}
