//! `upq upload` – upload files in batches into a destination directory.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use upq_core::config::UpqConfig;
use upq_core::error::TaskError;
use upq_core::task::{BatchId, TaskId, UploadSource, UploadTask};
use upq_core::uploader::LocalDirUploaderFactory;
use upq_core::{BatchScheduler, SchedulerSettings, UploadCallbacks};

use crate::cli::control_socket;

/// Print a progress line at most every this many percent per task.
const PROGRESS_STEP_PCT: f64 = 10.0;

/// Split `files` into batches of `batch_size` (all in one batch when `None`).
/// Batch ids start at 1; task ids restart at 1 in every batch.
pub(crate) fn plan_batches(
    files: &[PathBuf],
    batch_size: Option<usize>,
) -> Vec<(BatchId, Vec<UploadTask>)> {
    let size = batch_size.unwrap_or(files.len()).max(1);
    files
        .chunks(size)
        .zip(1u64..)
        .map(|(chunk, batch)| {
            let tasks = chunk
                .iter()
                .zip(1u64..)
                .map(|(path, id)| UploadTask::new(batch, id, UploadSource::File(path.clone())))
                .collect();
            (batch, tasks)
        })
        .collect()
}

/// Callback sink that prints one line per event.
#[derive(Default)]
pub(crate) struct ConsoleSink {
    last_pct: Mutex<HashMap<(BatchId, TaskId), f64>>,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl ConsoleSink {
    pub(crate) fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    pub(crate) fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::Relaxed)
    }

    /// True if a progress line should be printed for this update.
    pub(crate) fn should_print(&self, batch: BatchId, task: TaskId, percent: f64) -> bool {
        let mut last = self
            .last_pct
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let prev = last.get(&(batch, task)).copied();
        let due = match prev {
            None => true,
            Some(p) => (percent >= 100.0 && p < 100.0) || percent - p >= PROGRESS_STEP_PCT,
        };
        if due {
            last.insert((batch, task), percent);
        }
        due
    }
}

impl UploadCallbacks for ConsoleSink {
    fn on_hold(&self, batch: BatchId, task_ids: &[TaskId]) {
        println!("[batch {}] holding {} task(s)", batch, task_ids.len());
    }

    fn on_start(&self, batch: BatchId, task: TaskId) {
        println!("[batch {}] task {} started", batch, task);
    }

    fn on_progress(&self, batch: BatchId, task: TaskId, bytes_done: u64, bytes_total: u64, percent: f64) {
        if self.should_print(batch, task, percent) {
            let done_mib = bytes_done as f64 / 1_048_576.0;
            let total_mib = bytes_total as f64 / 1_048_576.0;
            println!(
                "[batch {}] task {}  {:.1} / {:.1} MiB ({:.1}%)",
                batch, task, done_mib, total_mib, percent
            );
        }
    }

    fn on_success(&self, batch: BatchId, task: TaskId) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        println!("[batch {}] task {} done", batch, task);
    }

    fn on_error(&self, batch: BatchId, task: TaskId, error: &TaskError) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        println!("[batch {}] task {} failed: {}", batch, task, error);
    }
}

pub async fn run_upload(
    cfg: &UpqConfig,
    files: &[PathBuf],
    batch_size: Option<usize>,
    dest: Option<&Path>,
) -> Result<()> {
    let dest = match dest {
        Some(d) => d.to_path_buf(),
        None if !cfg.server_endpoint.is_empty() => PathBuf::from(&cfg.server_endpoint),
        None => bail!("no destination: pass --dest or set server_endpoint in the config"),
    };
    tokio::fs::create_dir_all(&dest)
        .await
        .with_context(|| format!("create destination {}", dest.display()))?;

    let settings = SchedulerSettings {
        endpoint: dest.to_string_lossy().into_owned(),
        ..SchedulerSettings::from(cfg)
    };
    let sink = Arc::new(ConsoleSink::default());
    let scheduler = BatchScheduler::with_callbacks(
        settings,
        Arc::new(LocalDirUploaderFactory::new(cfg.chunk_size)),
        sink.clone(),
    );

    let socket_path = upq_core::control::default_control_socket_path().ok();
    let listener = socket_path.as_ref().and_then(|path| {
        match control_socket::spawn_control_listener(scheduler.clone(), path) {
            Ok(handle) => {
                tracing::debug!(path = %path.display(), "control socket listening");
                Some(handle)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "control socket unavailable: {:#}", e);
                None
            }
        }
    });

    let batches = plan_batches(files, batch_size);
    tracing::info!(files = files.len(), batches = batches.len(), dest = %dest.display(), "upload started");
    for (batch, tasks) in batches {
        scheduler.submit(batch, tasks)?;
    }

    tokio::select! {
        _ = scheduler.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            println!("Interrupted, cancelling uploads...");
            let snap = scheduler.snapshot();
            for batch in snap.admitted.into_iter().chain(snap.waiting) {
                scheduler.cancel_batch(batch).await?;
            }
            scheduler.wait_idle().await;
        }
    }

    if let Some(handle) = listener {
        handle.abort();
    }
    if let Some(path) = socket_path {
        let _ = std::fs::remove_file(path);
    }

    let failed = sink.failed();
    println!("{} uploaded, {} failed", sink.succeeded(), failed);
    if failed > 0 {
        bail!("{} upload(s) failed", failed);
    }
    Ok(())
}
