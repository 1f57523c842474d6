//! Task lifecycle payloads reported by the sandbox.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The task a lifecycle event belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    /// Sandbox-assigned task identifier.
    pub id: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Task name, usually the command being run.
    #[serde(default)]
    pub name: String,
    /// Task-specific extra data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A progress report for the running task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// Completion of the current task, 0 to 100.
    #[serde(default)]
    pub progress_percentage: f64,
    /// Status message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Longer description of the current step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Current step, 1-based.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
    /// Total number of steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_of_steps: Option<u32>,
    /// Elapsed time in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    /// Step name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Start of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskBegin {
    /// The task that started.
    pub task: TaskInfo,
    /// Batch operation id, when the sandbox tags its events with one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
}

/// Outcome of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskResult {
    /// The task succeeded.
    Success,
    /// The task failed.
    Fail,
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// Error details attached to a failed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    /// Sandbox error code.
    pub code: i64,
    /// Description of the error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Terminal outcome of a task, carrying an optional payload of type `T`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEnd<T = Value> {
    /// The task that ended.
    pub task: TaskInfo,
    /// Success or failure.
    pub result: TaskResult,
    /// Error details on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    /// Status message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Command-specific payload.
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> TaskEnd<T> {
    /// Check if the task succeeded.
    pub fn is_success(&self) -> bool {
        self.result == TaskResult::Success
    }

    /// Transform the payload, keeping the rest of the outcome.
    pub fn map_data<U>(self, f: impl FnOnce(T) -> U) -> TaskEnd<U> {
        TaskEnd {
            task: self.task,
            result: self.result,
            error: self.error,
            message: self.message,
            data: self.data.map(f),
        }
    }

    /// Split the payload off, returning an outcome without data.
    pub fn take_data<U>(self) -> (TaskEnd<U>, Option<T>) {
        let end = TaskEnd {
            task: self.task,
            result: self.result,
            error: self.error,
            message: self.message,
            data: None,
        };
        (end, self.data)
    }

    /// Turn this outcome into a failure with the given code and message.
    pub fn into_failure(mut self, code: i64, message: impl Into<String>) -> Self {
        self.result = TaskResult::Fail;
        self.error = Some(TaskError {
            code,
            description: None,
        });
        self.message = Some(message.into());
        self.data = None;
        self
    }
}

/// A task lifecycle event, in the order the sandbox emitted it.
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxEvent {
    /// Progress of the running task. `task` is absent for global progress.
    Progress {
        /// Progress report.
        progress: Progress,
        /// Task the report belongs to.
        task: Option<TaskInfo>,
    },
    /// A task started.
    TaskBegin(TaskBegin),
    /// A task ended.
    TaskEnd(TaskEnd),
}
