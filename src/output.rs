//! What a conversion hands back: the served document and status snapshots.
//!
//! [`ConvertedDocument`] owns the output artifact. Under
//! [`RetentionMode::Eager`] the file is deleted when the handle is consumed
//! or dropped, so a caller that stops reading half-way (a dropped HTTP
//! connection, a cancelled task) still leaves nothing behind. Under
//! [`RetentionMode::Janitor`] the file stays until the janitor's sweep.
//!
//! [`RetentionMode::Eager`]: crate::config::RetentionMode::Eager
//! [`RetentionMode::Janitor`]: crate::config::RetentionMode::Janitor

use crate::convert::Stage;
use crate::error::LabelError;
use crate::store::{Artifact, ArtifactGuard};
use chrono::{DateTime, Utc};
use futures::stream;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::pin::Pin;
use tokio::io::AsyncReadExt;
use tokio_stream::Stream;
use tracing::{debug, info};
use uuid::Uuid;

/// Media type of every served document.
pub const PDF_MEDIA_TYPE: &str = "application/pdf";

/// Read size for [`ConvertedDocument::into_stream`].
const CHUNK_SIZE: usize = 64 * 1024;

/// A boxed stream of output chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, LabelError>> + Send>>;

/// Who deletes the output file.
#[derive(Debug)]
pub(crate) enum Retained {
    /// Deleted when this value drops.
    Eager(ServedOutput),
    /// Left on disk for the janitor.
    Janitor(Artifact),
}

impl Retained {
    pub(crate) fn eager(job_id: Uuid, guard: ArtifactGuard) -> Self {
        Retained::Eager(ServedOutput { job_id, guard })
    }

    fn artifact(&self) -> &Artifact {
        match self {
            Retained::Eager(served) => served.guard.artifact(),
            Retained::Janitor(artifact) => artifact,
        }
    }
}

/// Output whose disposal closes the request: logs the last two stages.
#[derive(Debug)]
pub(crate) struct ServedOutput {
    job_id: Uuid,
    guard: ArtifactGuard,
}

impl Drop for ServedOutput {
    fn drop(&mut self) {
        if let Some(disposal) = self.guard.dispose_in_place() {
            debug!(
                job = %self.job_id,
                "Stage {}: output {} {:?}",
                Stage::Disposing,
                self.guard.artifact().id,
                disposal
            );
            info!(job = %self.job_id, "Stage {}", Stage::Done);
        }
    }
}

/// A finished conversion, ready to be served.
#[derive(Debug)]
pub struct ConvertedDocument {
    pub job_id: Uuid,
    /// Suggested download name: `{upload stem}_print.pdf`.
    pub filename: String,
    pub media_type: &'static str,
    pub page_count: usize,
    pub size_bytes: u64,
    retained: Retained,
}

impl ConvertedDocument {
    pub(crate) fn new(
        job_id: Uuid,
        filename: String,
        page_count: usize,
        size_bytes: u64,
        retained: Retained,
    ) -> Self {
        Self {
            job_id,
            filename,
            media_type: PDF_MEDIA_TYPE,
            page_count,
            size_bytes,
            retained,
        }
    }

    /// The output artifact backing this document.
    pub fn artifact(&self) -> &Artifact {
        self.retained.artifact()
    }

    /// Read the whole document into memory.
    ///
    /// Does not consume the handle; the artifact is disposed when the handle
    /// is dropped.
    pub async fn bytes(&self) -> Result<Vec<u8>, LabelError> {
        tokio::fs::read(&self.artifact().path)
            .await
            .map_err(|e| LabelError::storage("reading output", e))
    }

    /// Stream the document in chunks.
    ///
    /// The artifact is disposed after the last chunk, after a read error, or
    /// when the stream is dropped early.
    pub fn into_stream(self) -> ByteStream {
        struct State {
            // Declared first so the file handle closes before disposal.
            file: Option<tokio::fs::File>,
            retained: Retained,
        }

        let state = State {
            file: None,
            retained: self.retained,
        };

        Box::pin(stream::unfold(Some(state), |state| async move {
            let mut state = state?;
            if state.file.is_none() {
                match tokio::fs::File::open(&state.retained.artifact().path).await {
                    Ok(file) => state.file = Some(file),
                    Err(e) => return Some((Err(LabelError::storage("opening output", e)), None)),
                }
            }
            let file = state.file.as_mut()?;

            let mut buf = vec![0u8; CHUNK_SIZE];
            match file.read(&mut buf).await {
                // EOF: dropping `state` disposes the artifact.
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(buf), Some(state)))
                }
                Err(e) => Some((Err(LabelError::storage("reading output", e)), None)),
            }
        }))
    }

    /// Copy the document to `path` and release the handle.
    ///
    /// Uses atomic write (temp file + rename) so `path` never holds a
    /// partial file. Returns the number of bytes written.
    pub async fn save_to(self, path: impl AsRef<Path>) -> Result<u64, LabelError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LabelError::storage("creating destination directory", e))?;
        }

        let tmp_path = path.with_extension("pdf.tmp");
        let written = tokio::fs::copy(&self.artifact().path, &tmp_path)
            .await
            .map_err(|e| LabelError::storage("copying output", e))?;

        if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(LabelError::storage("moving output into place", e));
        }

        Ok(written)
    }
}

/// Artifact counts per area.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaCounts {
    pub artifacts: usize,
    pub bytes: u64,
}

/// Point-in-time health snapshot from [`crate::Converter::status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    pub inbound: AreaCounts,
    pub outbound: AreaCounts,
    pub scratch: AreaCounts,
    /// Job records currently retained.
    pub jobs: usize,
}

impl StatusReport {
    /// Artifacts on disk across all areas.
    pub fn total_artifacts(&self) -> usize {
        self.inbound.artifacts + self.outbound.artifacts + self.scratch.artifacts
    }
}
