//! Error types for the labelcrop library.
//!
//! Every failure a conversion can hit is a variant of [`LabelError`]. The
//! variants group into the coarse classes reported by [`LabelError::kind`]:
//!
//! * [`ErrorKind::Validation`]: the upload or its parameters are unusable.
//!   This is the only class that is the caller's fault; no storage is
//!   consumed beyond the rejected bytes.
//! * [`ErrorKind::Storage`]: an area is not writable or a disk read/write
//!   failed.
//! * [`ErrorKind::Geometry`]: the margin produces an empty or inverted clip
//!   rectangle on some page.
//! * [`ErrorKind::Transform`]: the source document cannot be read or
//!   composed.
//! * [`ErrorKind::Integrity`]: the output artifact is missing after a
//!   successful save.
//!
//! Messages produced by [`LabelError::public_message`] never contain
//! filesystem paths; the full `Display` output (which may) is meant for logs.

use crate::store::{Area, ArtifactId};
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the labelcrop library.
#[derive(Debug, Error)]
pub enum LabelError {
    // ── Validation errors ─────────────────────────────────────────────────
    /// Upload name does not carry the `.pdf` extension.
    #[error("Upload '{filename}' is not a PDF: the file name must end in .pdf")]
    InvalidUpload { filename: String },

    /// A conversion parameter is out of range.
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// Upload body exceeded the configured size cap.
    #[error("Upload exceeds the maximum size of {limit} bytes")]
    UploadTooLarge { limit: u64 },

    // ── Storage errors ────────────────────────────────────────────────────
    /// A storage area could not be created or is not writable.
    #[error("Storage area '{area}' at '{path}' is not writable: {source}")]
    AreaNotWritable {
        area: Area,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A read or write on an artifact failed.
    #[error("Storage failure while {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ── Geometry errors ───────────────────────────────────────────────────
    /// The margin moves the clip start outside the page.
    #[error(
        "Page {page}: margin yields clip start x={clip_start_x:.4}pt outside page width {page_width:.4}pt"
    )]
    Geometry {
        page: usize,
        clip_start_x: f64,
        page_width: f64,
    },

    // ── Transform errors ──────────────────────────────────────────────────
    /// The upload could not be parsed as a PDF.
    #[error("Document is corrupt or not a PDF: {detail}")]
    CorruptDocument { detail: String },

    /// A specific page could not be read or composed.
    #[error("Page {page} could not be composed: {detail}")]
    PageFailed { page: usize, detail: String },

    /// The document parsed but has no pages.
    #[error("Document contains no pages")]
    EmptyDocument,

    /// The document has more pages than the configured cap.
    #[error("Document has {pages} pages, more than the limit of {limit}")]
    TooManyPages { pages: usize, limit: usize },

    /// The transform stage ran past its wall-clock budget.
    #[error("Conversion timed out after {secs}s")]
    TimedOut { secs: u64 },

    /// Composition stopped because nobody waits for its result any more.
    #[error("Composition was abandoned before it finished")]
    Cancelled,

    // ── Integrity errors ──────────────────────────────────────────────────
    /// The output was saved without error but is absent or empty on disk.
    #[error("Output artifact {artifact} is missing after save")]
    OutputMissing { artifact: ArtifactId },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`LabelError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Storage,
    Geometry,
    Transform,
    Integrity,
    Internal,
}

impl LabelError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LabelError::InvalidUpload { .. }
            | LabelError::InvalidParameter { .. }
            | LabelError::UploadTooLarge { .. } => ErrorKind::Validation,
            LabelError::AreaNotWritable { .. } | LabelError::Storage { .. } => ErrorKind::Storage,
            LabelError::Geometry { .. } => ErrorKind::Geometry,
            LabelError::CorruptDocument { .. }
            | LabelError::PageFailed { .. }
            | LabelError::EmptyDocument
            | LabelError::TooManyPages { .. }
            | LabelError::TimedOut { .. }
            | LabelError::Cancelled => ErrorKind::Transform,
            LabelError::OutputMissing { .. } => ErrorKind::Integrity,
            LabelError::InvalidConfig(_) | LabelError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True only for errors the caller can fix by changing the upload.
    pub fn is_client_fault(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    /// Message safe to hand back to a remote caller.
    ///
    /// Identical to `Display` except for storage errors, whose messages
    /// would otherwise leak server paths.
    pub fn public_message(&self) -> String {
        match self {
            LabelError::AreaNotWritable { area, .. } => {
                format!("Storage area '{area}' is not writable")
            }
            LabelError::Storage { context, .. } => format!("Storage failure while {context}"),
            other => other.to_string(),
        }
    }

    pub(crate) fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        LabelError::Storage {
            context: context.into(),
            source,
        }
    }
}
