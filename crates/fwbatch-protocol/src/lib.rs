//! # fwbatch-protocol
//!
//! Wire types shared between the fwbatch orchestrator and the device sandbox.
//!
//! The sandbox is an external worker process. It generates operation
//! descriptors, executes batches of them and reports progress as
//! newline-delimited JSON messages on its standard output:
//!
//! ```text
//! {"type":"task_begin","data":{"task":{"id":"1","name":"erase",...}}}
//! {"type":"task_progress","data":{"task":{...},"progress":{"progressPercentage":40}}}
//! {"type":"task_end","data":{"task":{...},"result":"success"}}
//! {"type":"info","data":{...}}
//! {"type":"log","data":{"level":"DEBUG","message":"..."}}
//! ```
//!
//! [`read_messages`] decodes such a stream, forwarding task lifecycle events in
//! order over an [`EventSender`]. [`single_info`] extracts the one `info`
//! payload produced by a descriptor generation call.

mod batch;
mod error;
mod message;
mod reader;
mod task;

pub use batch::{BatchOperation, BatchRequest, OperationDescriptor};
pub use error::ProtocolError;
pub use message::{LogLevel, LogMessage, SandboxMessage, TaskProgress};
pub use reader::{read_messages, single_info};
pub use task::{Progress, SandboxEvent, TaskBegin, TaskEnd, TaskError, TaskInfo, TaskResult};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Sending half of the ordered sandbox event channel.
pub type EventSender = UnboundedSender<SandboxEvent>;

/// Receiving half of the ordered sandbox event channel.
pub type EventReceiver = UnboundedReceiver<SandboxEvent>;

/// Create a new sandbox event channel.
#[must_use]
pub fn event_channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}
