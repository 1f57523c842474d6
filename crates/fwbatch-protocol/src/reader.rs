//! Decoding of the sandbox's newline-delimited JSON output.

use crate::error::ProtocolError;
use crate::message::SandboxMessage;
use crate::EventSender;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Decode one non-empty line.
fn decode_line(line: &str, line_no: usize) -> Result<SandboxMessage, ProtocolError> {
    serde_json::from_str(line).map_err(|source| ProtocolError::Malformed {
        line: line_no,
        source,
    })
}

/// Read sandbox messages until end of stream.
///
/// Task lifecycle messages are forwarded to `events` in the order they were
/// written, `log` messages are re-emitted through `tracing`, and the payloads
/// of `info` messages are returned.
///
/// If the receiving side of `events` has gone away, remaining task events are
/// discarded but the stream is still read to the end.
///
/// # Errors
///
/// Returns an error on I/O failure or on the first line that is not a valid
/// message. Blank lines are skipped.
pub async fn read_messages<R>(reader: R, events: &EventSender) -> Result<Vec<Value>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut infos = Vec::new();
    let mut line_no = 0usize;
    let mut receiver_gone = false;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match decode_line(trimmed, line_no)? {
            SandboxMessage::Info(data) => infos.push(data),
            SandboxMessage::Log(log) => log.emit(),
            message => {
                let Some(event) = message.into_event() else {
                    continue;
                };
                if events.send(event).is_err() && !receiver_gone {
                    receiver_gone = true;
                    tracing::debug!(line = line_no, "Event receiver dropped, discarding task events");
                }
            }
        }
    }

    tracing::trace!(lines = line_no, infos = infos.len(), "Sandbox output consumed");
    Ok(infos)
}

/// Read the single `info` payload of a command, e.g. a generated descriptor.
///
/// Task events are ignored and `log` messages are re-emitted through
/// `tracing`. Returns `None` if the command produced no `info` message; if it
/// produced several, the first one wins.
///
/// # Errors
///
/// Returns an error on I/O failure, a malformed line, or if the payload does
/// not decode into `T`.
pub async fn single_info<T, R>(reader: R) -> Result<Option<T>, ProtocolError>
where
    T: DeserializeOwned,
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut info = None;
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match decode_line(trimmed, line_no)? {
            SandboxMessage::Info(data) if info.is_none() => info = Some(data),
            SandboxMessage::Info(_) => {
                tracing::debug!(line = line_no, "Ignoring additional info message");
            }
            SandboxMessage::Log(log) => log.emit(),
            _ => {}
        }
    }

    info.map(serde_json::from_value)
        .transpose()
        .map_err(ProtocolError::from)
}
