//! Artifact store: the only code that creates or deletes files.
//!
//! Three areas live under the configured base directory:
//!
//! | Area                 | Directory   | Holds                                   |
//! |----------------------|-------------|-----------------------------------------|
//! | [`Area::Inbound`]    | `uploads/`  | uploaded source documents               |
//! | [`Area::Outbound`]   | `outputs/`  | finished documents waiting to be served |
//! | [`Area::Scratch`]    | `scratch/`  | outputs being written, before promotion |
//!
//! Every artifact gets a fresh id (`{UTC timestamp}_{uuid}`) so concurrent
//! requests never share a path and nothing needs locking. Outputs are written
//! to scratch first and renamed into the outbound area in one step, so a
//! reader never sees a half-written file.
//!
//! [`ArtifactGuard`] owns an artifact and disposes it when dropped. Every
//! exit path of a request (error, panic, cancelled future) runs the drop.

use crate::error::LabelError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// File mode applied to every artifact on unix.
#[cfg(unix)]
const FILE_MODE: u32 = 0o644;
/// Directory mode applied to every area on unix.
#[cfg(unix)]
const DIR_MODE: u32 = 0o755;

/// One of the three storage areas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Area {
    Inbound,
    Outbound,
    Scratch,
}

impl Area {
    pub const ALL: [Area; 3] = [Area::Inbound, Area::Outbound, Area::Scratch];

    /// Directory name under the base directory.
    pub fn dir_name(self) -> &'static str {
        match self {
            Area::Inbound => "uploads",
            Area::Outbound => "outputs",
            Area::Scratch => "scratch",
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Area::Inbound => "input",
            Area::Outbound => "output",
            Area::Scratch => "scratch",
        }
    }

    fn index(self) -> usize {
        match self {
            Area::Inbound => 0,
            Area::Outbound => 1,
            Area::Scratch => 2,
        }
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Area::Inbound => "inbound",
            Area::Outbound => "outbound",
            Area::Scratch => "scratch",
        })
    }
}

/// Opaque artifact identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Mint a new id: microsecond UTC timestamp plus a random UUID.
    ///
    /// The timestamp keeps ids roughly time-ordered on disk; the UUID keeps
    /// two ids minted in the same clock tick apart.
    pub fn mint() -> Self {
        Self(format!(
            "{}_{}",
            Utc::now().format("%Y%m%dT%H%M%S%6f"),
            Uuid::new_v4().simple()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A file the store created (or reserved) and is responsible for deleting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub id: ArtifactId,
    pub area: Area,
    pub path: PathBuf,
    /// Set when bytes are first written; `None` for a bare reservation.
    pub created_at: Option<SystemTime>,
    pub size_bytes: u64,
}

impl Artifact {
    /// Age at `now`. `None` until the artifact has been written.
    /// Creation times in the future count as zero age.
    pub fn age(&self, now: SystemTime) -> Option<Duration> {
        self.created_at
            .map(|t| now.duration_since(t).unwrap_or(Duration::ZERO))
    }
}

/// Outcome of [`ArtifactStore::dispose`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposal {
    Removed,
    AlreadyGone,
    Failed,
}

/// Filesystem-backed artifact store.
#[derive(Debug)]
pub struct ArtifactStore {
    base_dir: PathBuf,
    dirs: [PathBuf; 3],
}

impl ArtifactStore {
    /// Create the area directories (idempotent) and check each is writable.
    ///
    /// Fails on the first area that cannot be created or written so a bad
    /// deployment is caught at start-up rather than on the first request.
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self, LabelError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        let dirs = Area::ALL.map(|area| base_dir.join(area.dir_name()));

        for area in Area::ALL {
            let dir = &dirs[area.index()];
            std::fs::create_dir_all(dir).map_err(|source| LabelError::AreaNotWritable {
                area,
                path: dir.clone(),
                source,
            })?;
            set_dir_mode(dir);
            check_writable(dir).map_err(|source| LabelError::AreaNotWritable {
                area,
                path: dir.clone(),
                source,
            })?;
            debug!("Area {} ready at {}", area, dir.display());
        }

        info!("Artifact store opened at {}", base_dir.display());
        Ok(Self { base_dir, dirs })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn area_dir(&self, area: Area) -> &Path {
        &self.dirs[area.index()]
    }

    /// Allocate a fresh id and path in `area`. No file is created.
    pub fn reserve(&self, area: Area) -> Artifact {
        let id = ArtifactId::mint();
        let path = self
            .area_dir(area)
            .join(format!("{}_{}.pdf", id, area.suffix()));
        Artifact {
            id,
            area,
            path,
            created_at: None,
            size_bytes: 0,
        }
    }

    /// Wrap an artifact in a guard that disposes it on drop.
    pub fn guard(self: &Arc<Self>, artifact: Artifact) -> ArtifactGuard {
        ArtifactGuard {
            store: Arc::clone(self),
            artifact,
            armed: true,
        }
    }

    /// Create the artifact's file with `bytes`.
    pub async fn write(&self, artifact: &mut Artifact, bytes: &[u8]) -> Result<(), LabelError> {
        let mut file = create_file(&artifact.path).await?;
        file.write_all(bytes)
            .await
            .map_err(|e| LabelError::storage(format!("writing {} artifact", artifact.area), e))?;
        file.flush()
            .await
            .map_err(|e| LabelError::storage(format!("flushing {} artifact", artifact.area), e))?;
        finish_write(artifact, bytes.len() as u64).await
    }

    /// Create the artifact's file from a reader, refusing more than `limit`
    /// bytes. Returns the number of bytes written.
    ///
    /// On any error the partial file is left in place for the owning guard
    /// to dispose.
    pub async fn write_stream<R>(
        &self,
        artifact: &mut Artifact,
        reader: R,
        limit: u64,
    ) -> Result<u64, LabelError>
    where
        R: AsyncRead + Unpin,
    {
        let mut file = create_file(&artifact.path).await?;
        let mut limited = reader.take(limit.saturating_add(1));
        let written = tokio::io::copy(&mut limited, &mut file)
            .await
            .map_err(|e| LabelError::storage(format!("streaming {} artifact", artifact.area), e))?;
        file.flush()
            .await
            .map_err(|e| LabelError::storage(format!("flushing {} artifact", artifact.area), e))?;
        if written > limit {
            return Err(LabelError::UploadTooLarge { limit });
        }
        finish_write(artifact, written).await?;
        Ok(written)
    }

    /// Move a fully written scratch artifact into `target` with one rename.
    ///
    /// On success the scratch guard is released (its file no longer exists);
    /// on failure it is dropped and the scratch file disposed.
    pub async fn promote(
        &self,
        scratch: ArtifactGuard,
        target: &mut Artifact,
    ) -> Result<(), LabelError> {
        tokio::fs::rename(&scratch.artifact().path, &target.path)
            .await
            .map_err(|e| LabelError::storage(format!("promoting output into {}", target.area), e))?;
        let moved = scratch.release();
        target.created_at = moved.created_at;
        target.size_bytes = moved.size_bytes;
        debug!("Promoted {} → {}", moved.id, target.id);
        Ok(())
    }

    /// Confirm an artifact exists on disk and is non-empty.
    pub async fn verify(&self, artifact: &Artifact) -> Result<u64, LabelError> {
        match tokio::fs::metadata(&artifact.path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(meta.len()),
            _ => Err(LabelError::OutputMissing {
                artifact: artifact.id.clone(),
            }),
        }
    }

    /// Delete the artifact's file. Idempotent; failures are logged only.
    pub fn dispose(&self, artifact: &Artifact) -> Disposal {
        match std::fs::remove_file(&artifact.path) {
            Ok(()) => {
                debug!("Disposed {} artifact {}", artifact.area, artifact.id);
                Disposal::Removed
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Disposal::AlreadyGone,
            Err(e) => {
                warn!(
                    "Failed to dispose {} artifact {}: {}",
                    artifact.area, artifact.id, e
                );
                Disposal::Failed
            }
        }
    }

    /// All artifacts currently in `area`, oldest first.
    ///
    /// Creation time is the file's modification time; artifacts are written
    /// once and never touched again.
    pub async fn list(&self, area: Area) -> Result<Vec<Artifact>, LabelError> {
        let dir = self.area_dir(area);
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| LabelError::storage(format!("listing {area}"), e))?;

        let mut artifacts = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| LabelError::storage(format!("listing {area}"), e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            // Entries can vanish between read_dir and metadata (eager disposal).
            let Ok(meta) = entry.metadata().await else { continue };
            if !meta.is_file() {
                continue;
            }
            artifacts.push(Artifact {
                id: parse_id(name, area),
                area,
                path: entry.path(),
                created_at: meta.modified().ok(),
                size_bytes: meta.len(),
            });
        }

        artifacts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(artifacts)
    }
}

/// Owns an artifact and disposes it exactly once unless released.
#[derive(Debug)]
pub struct ArtifactGuard {
    store: Arc<ArtifactStore>,
    artifact: Artifact,
    armed: bool,
}

impl ArtifactGuard {
    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    pub fn artifact_mut(&mut self) -> &mut Artifact {
        &mut self.artifact
    }

    /// Dispose now instead of at drop.
    pub fn dispose(mut self) -> Disposal {
        self.armed = false;
        self.store.dispose(&self.artifact)
    }

    /// Give up ownership without deleting anything.
    pub fn release(mut self) -> Artifact {
        self.armed = false;
        self.artifact.clone()
    }

    /// Dispose through a borrow, for owners that are being dropped themselves.
    /// `None` if the guard was already disarmed.
    pub(crate) fn dispose_in_place(&mut self) -> Option<Disposal> {
        if !self.armed {
            return None;
        }
        self.armed = false;
        Some(self.store.dispose(&self.artifact))
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        self.dispose_in_place();
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn create_file(path: &Path) -> Result<tokio::fs::File, LabelError> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(FILE_MODE);
    options
        .open(path)
        .await
        .map_err(|e| LabelError::storage("creating artifact file", e))
}

/// Apply the explicit file mode (umask may have narrowed it) and stamp the
/// artifact with its creation time and size.
async fn finish_write(artifact: &mut Artifact, size: u64) -> Result<(), LabelError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&artifact.path, std::fs::Permissions::from_mode(FILE_MODE))
            .await
            .map_err(|e| LabelError::storage("setting artifact permissions", e))?;
    }
    artifact.created_at = Some(SystemTime::now());
    artifact.size_bytes = size;
    debug!(
        "Wrote {} bytes to {} artifact {}",
        size, artifact.area, artifact.id
    );
    Ok(())
}

fn set_dir_mode(dir: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(DIR_MODE)) {
            warn!("Could not set mode on {}: {}", dir.display(), e);
        }
    }
    #[cfg(not(unix))]
    let _ = dir;
}

fn check_writable(dir: &Path) -> std::io::Result<()> {
    use std::io::Write;
    let mut check = tempfile::Builder::new().prefix(".write-check").tempfile_in(dir)?;
    check.write_all(b"ok")?;
    check.flush()
}

/// Recover the id from a `{id}_{suffix}.pdf` file name.
fn parse_id(file_name: &str, area: Area) -> ArtifactId {
    let stem = file_name.strip_suffix(".pdf").unwrap_or(file_name);
    let id = stem
        .strip_suffix(area.suffix())
        .and_then(|s| s.strip_suffix('_'))
        .unwrap_or(stem);
    ArtifactId(id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, Arc<ArtifactStore>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ArtifactStore::open(dir.path()).unwrap());
        (dir, store)
    }

    #[test]
    fn open_creates_all_areas_idempotently() {
        let dir = TempDir::new().unwrap();
        ArtifactStore::open(dir.path()).unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        for area in Area::ALL {
            assert!(store.area_dir(area).is_dir(), "{area} missing");
        }
        assert!(dir.path().join("uploads").is_dir());
        assert!(dir.path().join("outputs").is_dir());
        assert!(dir.path().join("scratch").is_dir());
    }

    #[test]
    fn open_fails_when_an_area_is_a_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("outputs"), b"in the way").unwrap();
        let err = ArtifactStore::open(dir.path()).unwrap_err();
        match err {
            LabelError::AreaNotWritable { area, .. } => assert_eq!(area, Area::Outbound),
            other => panic!("expected AreaNotWritable, got {other:?}"),
        }
    }

    #[test]
    fn reserve_creates_nothing() {
        let (_dir, store) = open_store();
        let a = store.reserve(Area::Inbound);
        assert!(!a.path.exists());
        assert!(a.created_at.is_none());
        assert!(a.path.starts_with(store.area_dir(Area::Inbound)));
        assert!(a.path.to_string_lossy().ends_with("_input.pdf"));
    }

    #[test]
    fn reserved_ids_are_unique() {
        let (_dir, store) = open_store();
        let ids: HashSet<ArtifactId> = (0..1000).map(|_| store.reserve(Area::Scratch).id).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[tokio::test]
    async fn write_records_metadata_and_mode() {
        let (_dir, store) = open_store();
        let mut a = store.reserve(Area::Outbound);
        store.write(&mut a, b"%PDF-1.5 test").await.unwrap();
        assert_eq!(a.size_bytes, 13);
        assert!(a.created_at.is_some());
        assert_eq!(std::fs::read(&a.path).unwrap(), b"%PDF-1.5 test");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&a.path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, FILE_MODE);
        }
    }

    #[tokio::test]
    async fn write_never_overwrites() {
        let (_dir, store) = open_store();
        let mut a = store.reserve(Area::Inbound);
        store.write(&mut a, b"first").await.unwrap();
        let mut again = a.clone();
        assert!(store.write(&mut again, b"second").await.is_err());
        assert_eq!(std::fs::read(&a.path).unwrap(), b"first");
    }

    #[tokio::test]
    async fn write_stream_enforces_limit() {
        let (_dir, store) = open_store();
        let mut a = store.reserve(Area::Inbound);
        let n = store.write_stream(&mut a, &b"12345"[..], 5).await.unwrap();
        assert_eq!(n, 5);

        let mut b = store.reserve(Area::Inbound);
        let err = store.write_stream(&mut b, &b"123456"[..], 5).await.unwrap_err();
        assert!(matches!(err, LabelError::UploadTooLarge { limit: 5 }));
    }

    #[tokio::test]
    async fn dispose_is_idempotent() {
        let (_dir, store) = open_store();
        let mut a = store.reserve(Area::Outbound);
        store.write(&mut a, b"x").await.unwrap();
        assert_eq!(store.dispose(&a), Disposal::Removed);
        assert_eq!(store.dispose(&a), Disposal::AlreadyGone);
        assert!(!a.path.exists());
    }

    #[tokio::test]
    async fn guard_disposes_on_drop_unless_released() {
        let (_dir, store) = open_store();

        let mut guard = store.guard(store.reserve(Area::Inbound));
        store.write(guard.artifact_mut(), b"x").await.unwrap();
        let path = guard.artifact().path.clone();
        drop(guard);
        assert!(!path.exists());

        let mut guard = store.guard(store.reserve(Area::Inbound));
        store.write(guard.artifact_mut(), b"x").await.unwrap();
        let kept = guard.release();
        assert!(kept.path.exists());
        store.dispose(&kept);
    }

    #[tokio::test]
    async fn promote_moves_scratch_into_outbound() {
        let (_dir, store) = open_store();
        let mut scratch = store.guard(store.reserve(Area::Scratch));
        store.write(scratch.artifact_mut(), b"%PDF").await.unwrap();
        let scratch_path = scratch.artifact().path.clone();

        let mut out = store.reserve(Area::Outbound);
        store.promote(scratch, &mut out).await.unwrap();
        assert!(!scratch_path.exists());
        assert_eq!(store.verify(&out).await.unwrap(), 4);
        assert_eq!(out.size_bytes, 4);
    }

    #[tokio::test]
    async fn verify_rejects_missing_and_empty() {
        let (_dir, store) = open_store();
        let missing = store.reserve(Area::Outbound);
        assert!(matches!(
            store.verify(&missing).await,
            Err(LabelError::OutputMissing { .. })
        ));
        let mut empty = store.reserve(Area::Outbound);
        store.write(&mut empty, b"").await.unwrap();
        assert!(store.verify(&empty).await.is_err());
    }

    #[tokio::test]
    async fn list_returns_written_artifacts_oldest_first() {
        let (_dir, store) = open_store();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let mut a = store.reserve(Area::Inbound);
            store.write(&mut a, b"x").await.unwrap();
            ids.push(a.id.clone());
        }
        // reserved only: not listed
        let _ = store.reserve(Area::Inbound);

        let listed = store.list(Area::Inbound).await.unwrap();
        assert_eq!(listed.len(), 3);
        let listed_ids: HashSet<_> = listed.iter().map(|a| a.id.clone()).collect();
        assert_eq!(listed_ids, ids.into_iter().collect());
        assert!(listed.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        assert!(store.list(Area::Outbound).await.unwrap().is_empty());
    }

    #[test]
    fn parse_id_round_trips_file_names() {
        let id = ArtifactId::mint();
        let name = format!("{}_output.pdf", id);
        assert_eq!(parse_id(&name, Area::Outbound), id);
        assert_eq!(parse_id("stray.pdf", Area::Outbound).as_str(), "stray");
    }
}
