//! `upq cancel <batch> [--task ID]` – ask a running `upq upload` to cancel.

use anyhow::Result;
use upq_core::control::ControlCommand;
use upq_core::task::{BatchId, TaskId};

use crate::cli::control_socket;

pub async fn run_cancel(batch: BatchId, task: Option<TaskId>) -> Result<()> {
    let cmd = match task {
        Some(task) => ControlCommand::CancelTask { batch, task },
        None => ControlCommand::CancelBatch { batch },
    };
    let path = upq_core::control::default_control_socket_path()?;
    if control_socket::send_command(&path, cmd).await? {
        println!("Sent \"{cmd}\"");
    } else {
        println!("No upload is running.");
    }
    Ok(())
}
