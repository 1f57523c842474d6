//! Correlation of the sandbox event stream with queued operations.
//!
//! The sandbox reports events in operation order without saying which
//! operation they belong to. The [`Dispatcher`] keeps two counters, the
//! operation that began last ("current") and the one that ended last, and
//! routes every event to the current operation's handler.

use crate::callbacks::OperationHandler;
use crate::error::{BatchError, Result, TaskFailure};
use crate::output::OperationOutput;
use fwbatch_protocol::{SandboxEvent, TaskBegin, TaskEnd};
use std::fmt;

/// Lifecycle of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Enqueued, the batch has not been run yet.
    Queued,
    /// Descriptor build in progress.
    DescriptorPending,
    /// Descriptor available, waiting for execution.
    Ready,
    /// Task began in the sandbox.
    Running,
    /// Task ended successfully.
    Completed,
    /// Task ended with a failure or was aborted.
    Failed,
}

impl OperationState {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "Queued"),
            Self::DescriptorPending => write!(f, "DescriptorPending"),
            Self::Ready => write!(f, "Ready"),
            Self::Running => write!(f, "Running"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Observer of operation state transitions, keyed by operation index.
pub(crate) type StateObserver = Box<dyn FnMut(usize, OperationState) + Send>;

/// Callback fired when a run of consecutive operations has ended.
pub(crate) type CollectFn = Box<dyn FnMut(&[TaskEnd<OperationOutput>]) + Send>;

/// A `collect` registration.
pub(crate) struct CollectionRequest {
    /// Index of the operation whose task end triggers the callback.
    pub operation_index: usize,
    /// Number of trailing results handed to the callback.
    pub count: usize,
    pub callback: CollectFn,
}

struct Slot {
    handler: Box<dyn OperationHandler>,
    state: OperationState,
}

/// Event dispatch state of a single run.
pub(crate) struct Dispatcher {
    slots: Vec<Slot>,
    collections: Vec<CollectionRequest>,
    results: Vec<TaskEnd<OperationOutput>>,
    current: Option<usize>,
    last_completed: Option<usize>,
    verify_operation_ids: bool,
    observer: Option<StateObserver>,
}

impl Dispatcher {
    /// Create a dispatcher for operations whose descriptors are all ready.
    pub(crate) fn new(
        handlers: Vec<Box<dyn OperationHandler>>,
        collections: Vec<CollectionRequest>,
        verify_operation_ids: bool,
    ) -> Self {
        let slots = handlers
            .into_iter()
            .map(|handler| Slot {
                handler,
                state: OperationState::Ready,
            })
            .collect();
        Self {
            slots,
            collections,
            results: Vec::new(),
            current: None,
            last_completed: None,
            verify_operation_ids,
            observer: None,
        }
    }

    /// Report every later state transition to `observer`.
    pub(crate) fn with_observer(mut self, observer: Option<StateObserver>) -> Self {
        self.observer = observer;
        self
    }

    fn transition(&mut self, index: usize, state: OperationState) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.state = state;
            if let Some(observe) = self.observer.as_mut() {
                observe(index, state);
            }
        }
    }

    /// Route one event to the current operation.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::OutOfOrder`] if id verification is enabled and a
    /// task-begin names a different operation than the tracked one.
    pub(crate) fn dispatch(&mut self, event: SandboxEvent) -> Result<()> {
        match event {
            SandboxEvent::Progress { progress, task } => {
                let (Some(task), Some(index)) = (task, self.current) else {
                    return Ok(());
                };
                if let Some(slot) = self.slots.get_mut(index) {
                    slot.handler.progress(&progress, &task);
                }
                Ok(())
            }
            SandboxEvent::TaskBegin(begin) => self.task_begin(begin),
            SandboxEvent::TaskEnd(end) => {
                self.task_end(end);
                Ok(())
            }
        }
    }

    fn task_begin(&mut self, begin: TaskBegin) -> Result<()> {
        let index = self.current.map_or(0, |i| i + 1);
        if index >= self.slots.len() {
            tracing::warn!(index, task_id = %begin.task.id, "Task begin beyond last operation, ignoring");
            return Ok(());
        }
        self.current = Some(index);
        self.transition(index, OperationState::Running);

        if let Some(id) = begin.operation_id.as_deref() {
            if id != index.to_string() {
                if self.verify_operation_ids {
                    return Err(BatchError::OutOfOrder {
                        expected: index,
                        actual: id.to_string(),
                    });
                }
                tracing::warn!(expected = index, actual = %id, "Task event operation id mismatch");
            }
        }

        if let Some(slot) = self.slots.get_mut(index) {
            tracing::debug!(
                operation_id = index,
                command = slot.handler.kind().command(),
                task_id = %begin.task.id,
                "Operation started"
            );
            slot.handler.task_begin(&begin);
        }
        Ok(())
    }

    fn task_end(&mut self, end: TaskEnd) {
        let Some(index) = self.current else {
            tracing::warn!(task_id = %end.task.id, "Task end before any task begin, ignoring");
            return;
        };
        if self.last_completed == Some(index) {
            tracing::warn!(operation_id = index, "Duplicate task end, ignoring");
            return;
        }
        let Some(slot) = self.slots.get_mut(index) else {
            return;
        };

        let record = slot.handler.task_end(end);
        tracing::debug!(
            operation_id = index,
            command = slot.handler.kind().command(),
            result = %record.result,
            "Operation ended"
        );
        let state = if record.is_success() {
            OperationState::Completed
        } else {
            OperationState::Failed
        };
        self.transition(index, state);
        self.results.push(record);

        for request in self
            .collections
            .iter_mut()
            .filter(|r| r.operation_index == index)
        {
            let start = self.results.len().saturating_sub(request.count);
            (request.callback)(&self.results[start..]);
        }

        self.last_completed = Some(index);
    }

    /// The operation that began but has not ended yet, if any.
    pub(crate) fn in_flight(&self) -> Option<usize> {
        match self.current {
            Some(index) if self.current != self.last_completed => Some(index),
            _ => None,
        }
    }

    /// Notify the in-flight operation, if any, that the run failed.
    pub(crate) fn fail_in_flight(&mut self, error: &BatchError) {
        if let Some(index) = self.in_flight() {
            tracing::debug!(operation_id = index, error = %error, "Aborting in-flight operation");
            self.fail(index, error);
        }
    }

    fn fail(&mut self, index: usize, error: &BatchError) {
        let Some(terminal) = self.slots.get(index).map(|s| s.state.is_terminal()) else {
            return;
        };
        if !terminal {
            self.transition(index, OperationState::Failed);
        }
        if let Some(slot) = self.slots.get_mut(index) {
            slot.handler.exception(error);
        }
    }

    /// State of the operation at `index`.
    #[cfg(test)]
    pub(crate) fn state(&self, index: usize) -> Option<OperationState> {
        self.slots.get(index).map(|s| s.state)
    }

    /// Settle a run whose sandbox call returned successfully.
    ///
    /// Any failed task turns into an aggregate [`BatchError::TaskFailures`],
    /// delivered to the current operation before it is returned.
    pub(crate) fn finish(mut self) -> Result<Vec<OperationOutput>> {
        let failures: Vec<TaskFailure> = self
            .results
            .iter()
            .enumerate()
            .filter(|(_, end)| !end.is_success())
            .map(|(position, end)| TaskFailure {
                operation_id: position,
                command: self.slots[position].handler.kind().command(),
                code: end.error.as_ref().map(|e| e.code),
                message: end.message.clone(),
            })
            .collect();

        if !failures.is_empty() {
            let error = BatchError::TaskFailures(failures);
            if let Some(index) = self.current {
                self.fail(index, &error);
            }
            return Err(error);
        }

        if self.results.len() < self.slots.len() {
            let error = BatchError::Incomplete {
                expected: self.slots.len(),
                completed: self.results.len(),
            };
            self.fail_in_flight(&error);
            return Err(error);
        }

        Ok(self.results.into_iter().filter_map(|end| end.data).collect())
    }
}
