//! Control protocol for cancelling uploads of a running `upq upload`.
//!
//! One command per line: `cancel-batch <batch>` or `cancel-task <batch> <task>`.
//! The listener lives in the CLI; this module owns the line format and the
//! socket location so client and server agree.

use std::fmt;
use std::path::PathBuf;

use crate::task::{BatchId, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    CancelBatch { batch: BatchId },
    CancelTask { batch: BatchId, task: TaskId },
}

impl ControlCommand {
    /// Parse one protocol line. Returns `None` for malformed input.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let cmd = parts.next()?;
        let parsed = match cmd {
            "cancel-batch" => ControlCommand::CancelBatch {
                batch: parts.next()?.parse().ok()?,
            },
            "cancel-task" => ControlCommand::CancelTask {
                batch: parts.next()?.parse().ok()?,
                task: parts.next()?.parse().ok()?,
            },
            _ => return None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(parsed)
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::CancelBatch { batch } => write!(f, "cancel-batch {}", batch),
            ControlCommand::CancelTask { batch, task } => {
                write!(f, "cancel-task {} {}", batch, task)
            }
        }
    }
}

/// Default path for the control socket (XDG state dir, next to the log).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("upq")?.get_state_home();
    Ok(dir.join("control.sock"))
}
