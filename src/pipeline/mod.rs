//! Pipeline stages for label conversion.
//!
//! Each submodule implements exactly one transformation step. Neither touches
//! the artifact store; the coordinator in [`crate::convert`] decides where
//! bytes come from and where they go.
//!
//! ## Data Flow
//!
//! ```text
//! source page ──▶ geometry ──▶ compose ──▶ serialised PDF
//!  (page box)    (clip, cm)   (Form XObject per page)
//! ```
//!
//! 1. [`geometry`]: pure arithmetic computing the clip rectangle and the
//!    canvas mapping for one page
//! 2. [`compose`]: build the destination document with lopdf; runs in
//!    `spawn_blocking` because parsing and serialising are CPU-bound

pub mod compose;
pub mod geometry;
