//! # labelcrop
//!
//! Re-project every page of a PDF onto a fixed-size label canvas, with
//! managed ephemeral storage for uploads and outputs.
//!
//! ## Why this crate?
//!
//! Shipping labels often arrive as the right half of a letter-sized page.
//! Thermal printers want a 4in × 6in page holding only the label. This crate
//! clips each page from a configurable margin off its centre line to its right
//! edge and scales that region onto the label canvas. It stays vector: pages
//! are wrapped as Form XObjects, never rasterised.
//!
//! The other half of the job is housekeeping. Uploads and outputs are files
//! on disk; each one is owned by a guard that deletes it on every exit path,
//! and a background janitor removes anything older than the retention
//! window.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Validate   .pdf name, parameters, size cap
//!  ├─ 2. Store      write to uploads/ under a fresh id
//!  ├─ 3. Compose    clip + scale every page (lopdf, spawn_blocking)
//!  ├─ 4. Publish    write to scratch/, rename into outputs/, verify
//!  └─ 5. Serve      ConvertedDocument; disposed once read (eager mode)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use labelcrop::{ConversionParams, Converter, ServiceConfig, Upload};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let converter = Converter::start(ServiceConfig::default())?;
//!     let janitor = converter.janitor().spawn();
//!
//!     let upload = Upload::from_path("shipment.pdf").await?;
//!     let document = converter
//!         .convert(upload, &ConversionParams::default())
//!         .await?;
//!     println!("{} pages → {}", document.page_count, document.filename);
//!     document.save_to("shipment_print.pdf").await?;
//!
//!     janitor.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `labelcrop` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! labelcrop = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod janitor;
pub mod jobs;
pub mod output;
pub mod pipeline;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ConversionParams, ConversionParamsBuilder, RetentionMode, ServiceConfig, ServiceConfigBuilder,
};
pub use convert::{download_name, Converter, Stage, Upload};
pub use error::{ErrorKind, LabelError};
pub use janitor::{Janitor, JanitorHandle, JanitorPolicy, SweepReport};
pub use jobs::{ConversionJob, JobStatus, JobStore};
pub use output::{AreaCounts, ByteStream, ConvertedDocument, StatusReport, PDF_MEDIA_TYPE};
pub use pipeline::compose::CancelFlag;
pub use pipeline::geometry::{CanvasSpec, PageBox, PageTransform, Rotation, MM_TO_POINTS};
pub use store::{Area, Artifact, ArtifactGuard, ArtifactId, ArtifactStore, Disposal};
