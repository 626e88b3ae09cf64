//! Append-only JSONL capture store.
//!
//! One line per completed exchange. Writers are serialized by the mutex, so
//! concurrent exchanges queue in arrival order and lines never interleave.
//! Durability is best-effort: no fsync per line.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use llmtap_cook::record::RawRecord;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Shared handle to the capture log. Cheap to clone; constructed once at
/// proxy startup and passed into the request handlers by parameter.
#[derive(Clone)]
pub struct CaptureStore {
    file: Arc<Mutex<tokio::fs::File>>,
    path: PathBuf,
}

impl CaptureStore {
    /// Open (or create) the capture log for appending.
    pub async fn create(path: &Path) -> std::io::Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            path: path.to_path_buf(),
        })
    }

    /// Append one record as a single JSON line.
    ///
    /// Failures are returned to the caller — the proxy logs them and keeps
    /// serving; a record is never silently dropped.
    pub async fn append(&self, record: &RawRecord) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(record).map_err(std::io::Error::other)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
