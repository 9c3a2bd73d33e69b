//! Uploader that "uploads" into a local destination directory.
//!
//! Copies the source in chunks, reporting progress after each chunk. A failed
//! attempt is retried on the task's delay schedule and continues from the
//! bytes already written; a resume token names an existing partial file to
//! continue. Abort stops at the next chunk boundary, flushes and closes the
//! destination.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::task::JoinHandle;

use crate::error::UploadError;
use crate::retry;
use crate::task::UploadSource;

use super::{UploadEvents, UploadRequest, Uploader, UploaderFactory};

/// Default copy chunk size (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Builds [`LocalDirUploader`]s; the task endpoint is the destination directory.
#[derive(Debug, Clone)]
pub struct LocalDirUploaderFactory {
    chunk_size: usize,
}

impl Default for LocalDirUploaderFactory {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl LocalDirUploaderFactory {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }
}

impl UploaderFactory for LocalDirUploaderFactory {
    fn create(
        &self,
        request: UploadRequest,
        events: UploadEvents,
    ) -> Result<Box<dyn Uploader>, UploadError> {
        if request.options.endpoint.is_empty() {
            return Err(UploadError::Other(
                "no destination directory configured".to_string(),
            ));
        }
        Ok(Box::new(LocalDirUploader::new(request, events, self.chunk_size)))
    }
}

pub struct LocalDirUploader {
    request: Option<UploadRequest>,
    target: PathBuf,
    events: UploadEvents,
    chunk_size: usize,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl LocalDirUploader {
    pub fn new(request: UploadRequest, events: UploadEvents, chunk_size: usize) -> Self {
        let target = target_path(&request);
        Self {
            request: Some(request),
            target,
            events,
            chunk_size: chunk_size.max(1),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Destination file for this upload.
    pub fn target(&self) -> &Path {
        &self.target
    }
}

/// Resume URL names the partial file directly; otherwise the file goes into
/// the endpoint directory under its metadata filename, source name or task id.
fn target_path(request: &UploadRequest) -> PathBuf {
    if let Some(url) = &request.options.upload_url {
        return PathBuf::from(url);
    }
    let name = request
        .options
        .metadata
        .get("filename")
        .cloned()
        .or_else(|| request.source.name())
        .unwrap_or_else(|| format!("task-{}", request.task_id));
    Path::new(&request.options.endpoint).join(name)
}

#[async_trait]
impl Uploader for LocalDirUploader {
    fn start(&mut self) {
        let Some(request) = self.request.take() else {
            return;
        };
        let target = self.target.clone();
        let events = self.events.clone();
        let stop = Arc::clone(&self.stop);
        let chunk_size = self.chunk_size;
        self.worker = Some(tokio::spawn(async move {
            let resume = request.options.upload_url.is_some();
            let schedule = request.options.retry_delays.clone();
            let result = retry::run_with_retry(&schedule, Some(events.cancel_signal()), |attempt| {
                // Later attempts continue from whatever the earlier ones wrote.
                let continue_partial = resume || attempt > 1;
                copy_chunks(
                    &request.source,
                    &target,
                    continue_partial,
                    chunk_size,
                    &events,
                    &stop,
                )
            })
            .await;
            if stop.load(Ordering::Relaxed) || events.is_cancel_requested() {
                tracing::debug!(path = %target.display(), "local upload stopped");
                return;
            }
            match result {
                Ok(_) => events.success(),
                Err(e) => events.error(e),
            }
        }));
    }

    async fn abort(&mut self, terminate: bool) -> Result<(), UploadError> {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            worker
                .await
                .map_err(|e| UploadError::Other(format!("upload worker join: {}", e)))?;
        }
        if terminate {
            match fs::remove_file(&self.target).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

enum SourceReader {
    File(File),
    Memory { bytes: Arc<[u8]>, pos: usize },
}

impl SourceReader {
    async fn open(source: &UploadSource) -> Result<(Self, u64), UploadError> {
        match source {
            UploadSource::File(path) => {
                let file = File::open(path).await?;
                let len = file.metadata().await?.len();
                Ok((SourceReader::File(file), len))
            }
            UploadSource::Memory { bytes, .. } => Ok((
                SourceReader::Memory {
                    bytes: Arc::clone(bytes),
                    pos: 0,
                },
                bytes.len() as u64,
            )),
        }
    }

    async fn seek(&mut self, offset: u64) -> Result<(), UploadError> {
        match self {
            SourceReader::File(f) => {
                f.seek(SeekFrom::Start(offset)).await?;
            }
            SourceReader::Memory { bytes, pos } => {
                *pos = (offset as usize).min(bytes.len());
            }
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, UploadError> {
        match self {
            SourceReader::File(f) => Ok(f.read(buf).await?),
            SourceReader::Memory { bytes, pos } => {
                let n = buf.len().min(bytes.len() - *pos);
                buf[..n].copy_from_slice(&bytes[*pos..*pos + n]);
                *pos += n;
                Ok(n)
            }
        }
    }
}

/// One transfer attempt. Returns `Ok(false)` when stopped before completion.
async fn copy_chunks(
    source: &UploadSource,
    target: &Path,
    continue_partial: bool,
    chunk_size: usize,
    events: &UploadEvents,
    stop: &AtomicBool,
) -> Result<bool, UploadError> {
    let (mut reader, total) = SourceReader::open(source).await?;

    let offset = if continue_partial {
        match fs::metadata(target).await {
            Ok(m) if m.len() <= total => m.len(),
            _ => 0,
        }
    } else {
        0
    };

    let mut out = OpenOptions::new()
        .write(true)
        .create(true)
        .open(target)
        .await?;
    out.set_len(offset).await?;
    out.seek(SeekFrom::Start(offset)).await?;
    reader.seek(offset).await?;

    let mut done = offset;
    events.progress(done, total);
    let mut buf = vec![0u8; chunk_size];
    loop {
        if stop.load(Ordering::Relaxed) || events.is_cancel_requested() {
            out.flush().await?;
            return Ok(false);
        }
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n]).await?;
        done += n as u64;
        events.progress(done, total);
    }
    out.flush().await?;
    out.sync_all().await?;
    Ok(true)
}
