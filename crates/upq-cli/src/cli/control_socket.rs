//! Control socket: server (during `upq upload`) and client (for `upq cancel`).
//! Protocol: one `ControlCommand` per line, e.g. "cancel-batch 2".

use anyhow::Result;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use upq_core::control::ControlCommand;
use upq_core::BatchScheduler;

/// Spawns a task that listens on `path` and forwards each command line to the
/// scheduler. Malformed lines are logged and ignored.
pub fn spawn_control_listener(
    scheduler: BatchScheduler,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)?;
    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let scheduler = scheduler.clone();
                    tokio::spawn(async move {
                        let mut reader = BufReader::new(stream).lines();
                        while let Ok(Some(line)) = reader.next_line().await {
                            match ControlCommand::parse(&line) {
                                Some(cmd) => dispatch(&scheduler, cmd).await,
                                None => tracing::debug!(line = %line.trim(), "ignoring control line"),
                            }
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

async fn dispatch(scheduler: &BatchScheduler, cmd: ControlCommand) {
    tracing::info!(%cmd, "control command");
    let result = match cmd {
        ControlCommand::CancelBatch { batch } => scheduler.cancel_batch(batch).await,
        ControlCommand::CancelTask { batch, task } => scheduler.cancel_task(batch, task).await,
    };
    if let Err(e) = result {
        tracing::warn!(%cmd, "control command failed: {}", e);
    }
}

/// Sends one command line to the control socket. Returns `false` without
/// sending if nothing listens at `socket_path`.
pub async fn send_command(socket_path: &Path, cmd: ControlCommand) -> Result<bool> {
    if !socket_path.exists() {
        return Ok(false);
    }
    let mut stream = match UnixStream::connect(socket_path).await {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    stream.write_all(format!("{}\n", cmd).as_bytes()).await?;
    stream.shutdown().await?;
    Ok(true)
}
