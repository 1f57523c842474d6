//! The JSON-lines message envelope written by the sandbox.

use crate::task::{Progress, SandboxEvent, TaskBegin, TaskEnd, TaskInfo};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One line of sandbox output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SandboxMessage {
    /// A task started.
    TaskBegin(TaskBegin),
    /// Progress of a running task.
    TaskProgress(TaskProgress),
    /// A task ended.
    TaskEnd(TaskEnd),
    /// Command result payload (e.g. a generated descriptor).
    Info(Value),
    /// Diagnostic log line from the sandbox.
    Log(LogMessage),
}

impl SandboxMessage {
    /// Convert a task lifecycle message into an event.
    ///
    /// Returns `None` for `info` and `log` messages.
    pub fn into_event(self) -> Option<SandboxEvent> {
        match self {
            Self::TaskBegin(begin) => Some(SandboxEvent::TaskBegin(begin)),
            Self::TaskProgress(p) => Some(SandboxEvent::Progress {
                progress: p.progress,
                task: p.task,
            }),
            Self::TaskEnd(end) => Some(SandboxEvent::TaskEnd(end)),
            Self::Info(_) | Self::Log(_) => None,
        }
    }
}

/// Payload of a `task_progress` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    /// Task the progress belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskInfo>,
    /// Progress report.
    pub progress: Progress,
}

/// Sandbox log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[serde(alias = "WARNING")]
    Warn,
    Error,
    Critical,
}

/// A log line forwarded from the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    /// Severity.
    pub level: LogLevel,
    /// Log text.
    pub message: String,
}

impl LogMessage {
    /// Re-emit this message through `tracing` at the matching level.
    pub fn emit(&self) {
        let message = self.message.as_str();
        match self.level {
            LogLevel::Trace => tracing::trace!(target: "fwbatch::sandbox", "{message}"),
            LogLevel::Debug => tracing::debug!(target: "fwbatch::sandbox", "{message}"),
            LogLevel::Info => tracing::info!(target: "fwbatch::sandbox", "{message}"),
            LogLevel::Warn => tracing::warn!(target: "fwbatch::sandbox", "{message}"),
            LogLevel::Error | LogLevel::Critical => {
                tracing::error!(target: "fwbatch::sandbox", "{message}")
            }
        }
    }
}
