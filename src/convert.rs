//! Conversion entry point: the request lifecycle from upload to served file.
//!
//! [`Converter`] owns the artifact store and the job registry. One call to
//! [`Converter::convert`] runs these stages, logging each with the job id:
//!
//! ```text
//! Validating ─► StoringInput ─► Transforming ─► StoringOutput ─► Serving
//!      │              │               │                │            │
//!      └──────────────┴───────────────┴────────────────┴──► Failed  └─► Disposing ─► Done
//! ```
//!
//! Disposing is logged twice: once for the input, right after Transforming,
//! and once for the output when the served handle is dropped. In janitor
//! retention mode Done follows Serving directly.
//!
//! ## Why guards instead of cleanup blocks?
//!
//! Every artifact a request creates is owned by an [`ArtifactGuard`]. Early
//! returns via `?`, panics in the blocking task, and a caller dropping the
//! `convert` future all run the guard's `Drop`, so the input, scratch and
//! output files are removed on every path without a cleanup block per stage.
//!
//! [`ArtifactGuard`]: crate::store::ArtifactGuard

use crate::config::{ConversionParams, RetentionMode, ServiceConfig};
use crate::error::LabelError;
use crate::janitor::{Janitor, JanitorPolicy};
use crate::jobs::{ConversionJob, JobStore};
use crate::output::{AreaCounts, ConvertedDocument, Retained, StatusReport};
use crate::pipeline::compose;
use crate::store::{Area, ArtifactStore};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

/// Accepted upload names: anything ending in `.pdf`, any case.
static PDF_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.pdf$").unwrap());

/// Characters not allowed in a suggested download name.
static UNSAFE_NAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\x00-\x1f\x7f"\\/:*?<>|]"#).unwrap());

/// Lifecycle stage of a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validating,
    StoringInput,
    Transforming,
    StoringOutput,
    Serving,
    Disposing,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Validating => "validating",
            Stage::StoringInput => "storing_input",
            Stage::Transforming => "transforming",
            Stage::StoringOutput => "storing_output",
            Stage::Serving => "serving",
            Stage::Disposing => "disposing",
            Stage::Done => "done",
            Stage::Failed => "failed",
        })
    }
}

/// An uploaded document: client file name plus body.
pub struct Upload {
    filename: String,
    body: UploadBody,
}

enum UploadBody {
    Bytes(Vec<u8>),
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

impl Upload {
    pub fn from_bytes(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            body: UploadBody::Bytes(bytes.into()),
        }
    }

    /// Upload whose body is read incrementally, e.g. from a socket.
    pub fn from_reader<R>(filename: impl Into<String>, reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            filename: filename.into(),
            body: UploadBody::Reader(Box::new(reader)),
        }
    }

    /// Read a local file as an upload, keeping its file name.
    pub async fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self, LabelError> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| LabelError::storage("opening local upload", e))?;
        Ok(Self::from_reader(filename, file))
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }
}

impl fmt::Debug for Upload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match &self.body {
            UploadBody::Bytes(b) => format!("{} bytes", b.len()),
            UploadBody::Reader(_) => "reader".to_string(),
        };
        f.debug_struct("Upload")
            .field("filename", &self.filename)
            .field("body", &body)
            .finish()
    }
}

/// Runs conversions against one artifact store.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct Converter {
    config: ServiceConfig,
    store: Arc<ArtifactStore>,
    jobs: JobStore,
}

impl Converter {
    /// Open (and create if needed) the storage areas under `config.base_dir`.
    ///
    /// # Errors
    /// [`LabelError::AreaNotWritable`] if any area cannot be created or
    /// written.
    pub fn start(config: ServiceConfig) -> Result<Self, LabelError> {
        let store = Arc::new(ArtifactStore::open(&config.base_dir)?);
        let jobs = JobStore::new(config.job_ttl, config.max_jobs);
        info!(
            "Converter ready: retention {:?}, mode {:?}, max {} pages",
            config.retention_window, config.retention_mode, config.max_pages
        );
        Ok(Self {
            config,
            store,
            jobs,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// A janitor over this converter's store, using the configured policy.
    /// Call [`Janitor::spawn`] on it to start the background sweep.
    pub fn janitor(&self) -> Janitor {
        Janitor::new(Arc::clone(&self.store), JanitorPolicy::from(&self.config))
    }

    /// Convert one upload.
    ///
    /// # Returns
    /// A [`ConvertedDocument`] handle over the output artifact. The input
    /// artifact is already gone by the time this returns.
    ///
    /// # Errors
    /// Any [`LabelError`]; check [`LabelError::is_client_fault`] to tell a bad
    /// upload from a server-side failure. No artifact of the request remains
    /// on disk after an error.
    pub async fn convert(
        &self,
        upload: Upload,
        params: &ConversionParams,
    ) -> Result<ConvertedDocument, LabelError> {
        let job_id = self.jobs.register();
        let span = info_span!("convert", job = %job_id);

        async move {
            let mut stage = Stage::Validating;
            match self.run(job_id, upload, params, &mut stage).await {
                Ok(document) => {
                    self.jobs.mark_done(job_id, document.artifact().id.clone());
                    info!(
                        "Stage {}: {} ({} pages, {} bytes)",
                        Stage::Serving,
                        document.filename,
                        document.page_count,
                        document.size_bytes
                    );
                    if self.config.retention_mode == RetentionMode::Janitor {
                        info!("Stage {}: output left for the sweep", Stage::Done);
                    }
                    Ok(document)
                }
                Err(e) => {
                    error!(
                        stage = %stage,
                        kind = ?e.kind(),
                        "Conversion failed: {}",
                        e
                    );
                    self.jobs.mark_failed(job_id, e.public_message());
                    debug!("Stage {}", Stage::Failed);
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        job_id: Uuid,
        upload: Upload,
        params: &ConversionParams,
        stage: &mut Stage,
    ) -> Result<ConvertedDocument, LabelError> {
        let Upload { filename, body } = upload;

        // ── Step 1: Validate ─────────────────────────────────────────────────
        debug!("Stage {}: '{}'", stage, filename);
        validate_filename(&filename)?;
        params.validate()?;
        if let UploadBody::Bytes(bytes) = &body {
            if bytes.len() as u64 > self.config.max_upload_bytes {
                return Err(LabelError::UploadTooLarge {
                    limit: self.config.max_upload_bytes,
                });
            }
        }

        // ── Step 2: Persist the upload ───────────────────────────────────────
        *stage = Stage::StoringInput;
        self.jobs.mark_running(job_id);
        let mut input = self.store.guard(self.store.reserve(Area::Inbound));
        let input_bytes = match body {
            UploadBody::Bytes(bytes) => {
                self.store.write(input.artifact_mut(), &bytes).await?;
                bytes.len() as u64
            }
            UploadBody::Reader(reader) => {
                self.store
                    .write_stream(input.artifact_mut(), reader, self.config.max_upload_bytes)
                    .await?
            }
        };
        info!("Stage {}: {} bytes as {}", stage, input_bytes, input.artifact().id);

        // ── Step 3: Transform ────────────────────────────────────────────────
        *stage = Stage::Transforming;
        let timeout = self.config.conversion_timeout;
        let composed = tokio::time::timeout(
            timeout,
            compose::compose_file(&input.artifact().path, params, self.config.max_pages),
        )
        .await
        .map_err(|_| LabelError::TimedOut {
            secs: timeout.as_secs(),
        })??;
        info!("Stage {}: {} pages composed", stage, composed.page_count);

        // The source is never read again.
        let input_id = input.artifact().id.clone();
        let disposal = input.dispose();
        debug!("Stage {}: input {} {:?}", Stage::Disposing, input_id, disposal);

        // ── Step 4: Persist the output ───────────────────────────────────────
        *stage = Stage::StoringOutput;
        let mut scratch = self.store.guard(self.store.reserve(Area::Scratch));
        self.store
            .write(scratch.artifact_mut(), &composed.bytes)
            .await?;
        drop(composed.bytes);

        let mut output = self.store.guard(self.store.reserve(Area::Outbound));
        self.store.promote(scratch, output.artifact_mut()).await?;
        let size_bytes = self.store.verify(output.artifact()).await?;
        info!("Stage {}: {} ({} bytes)", stage, output.artifact().id, size_bytes);

        // ── Step 5: Hand over ────────────────────────────────────────────────
        *stage = Stage::Serving;
        let retained = match self.config.retention_mode {
            RetentionMode::Eager => Retained::eager(job_id, output),
            RetentionMode::Janitor => Retained::Janitor(output.release()),
        };

        Ok(ConvertedDocument::new(
            job_id,
            download_name(&filename),
            composed.page_count,
            size_bytes,
            retained,
        ))
    }

    /// Status record of a recent conversion, if still retained.
    pub fn job(&self, job_id: Uuid) -> Option<ConversionJob> {
        self.jobs.get(job_id)
    }

    /// Snapshot of what is currently on disk and in the job registry.
    pub async fn status(&self) -> Result<StatusReport, LabelError> {
        let mut counts = [AreaCounts::default(); 3];
        for (slot, area) in counts.iter_mut().zip(Area::ALL) {
            let artifacts = self.store.list(area).await?;
            slot.artifacts = artifacts.len();
            slot.bytes = artifacts.iter().map(|a| a.size_bytes).sum();
        }
        let [inbound, outbound, scratch] = counts;
        Ok(StatusReport {
            generated_at: Utc::now(),
            inbound,
            outbound,
            scratch,
            jobs: self.jobs.len(),
        })
    }
}

/// Reject anything whose name does not end in `.pdf`.
fn validate_filename(filename: &str) -> Result<(), LabelError> {
    if PDF_NAME.is_match(filename) {
        Ok(())
    } else {
        Err(LabelError::InvalidUpload {
            filename: filename.to_string(),
        })
    }
}

/// `{stem}_print.pdf`, where the stem is the upload's base name without its
/// extension and without characters that would break a header or a path.
pub fn download_name(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let stem = PDF_NAME.replace(base, "");
    let stem = UNSAFE_NAME_CHARS.replace_all(stem.trim(), "_");
    let stem = if stem.is_empty() { "document".into() } else { stem };
    format!("{}_print.pdf", stem)
}
