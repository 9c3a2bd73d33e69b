//! Upload task model: what a caller submits for a batch.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Batch identifier. Batches are independent groups of tasks.
pub type BatchId = u64;

/// Task identifier, unique within its batch (not globally).
pub type TaskId = u64;

/// Where the bytes of an upload come from.
#[derive(Debug, Clone)]
pub enum UploadSource {
    /// A file on disk, read when the transfer starts.
    File(PathBuf),
    /// An in-memory blob with a display name.
    Memory { name: String, bytes: Arc<[u8]> },
}

impl UploadSource {
    /// Name used for the uploaded object when no metadata overrides it.
    pub fn name(&self) -> Option<String> {
        match self {
            UploadSource::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            UploadSource::Memory { name, .. } => Some(name.clone()),
        }
    }
}

/// One upload unit. Immutable once submitted.
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub id: TaskId,
    pub batch_id: BatchId,
    pub source: UploadSource,
    /// Opaque identifier of a previous interrupted upload to continue.
    pub resume_token: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
}

impl UploadTask {
    pub fn new(batch_id: BatchId, id: TaskId, source: UploadSource) -> Self {
        Self {
            id,
            batch_id,
            source,
            resume_token: None,
            metadata: BTreeMap::new(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_resume_token(mut self, token: impl Into<String>) -> Self {
        self.resume_token = Some(token.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}
