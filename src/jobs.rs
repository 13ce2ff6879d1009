//! Bounded registry of conversion job records.
//!
//! Each call to [`crate::Converter::convert`] registers a [`ConversionJob`]
//! and moves it through `pending → running → done | failed`. Records are
//! kept for `job_ttl` after their last update and the map never holds more
//! than `max_jobs` entries; when full, the oldest finished record goes first,
//! then the oldest record of any status.
//!
//! The map sits behind a `std::sync::Mutex` that is never held across an
//! `.await`.

use crate::store::ArtifactId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Lifecycle state of a [`ConversionJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

/// Status record for one conversion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionJob {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub output_artifact_id: Option<ArtifactId>,
    /// Public error message (no filesystem paths) when `status` is failed.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Entry {
    job: ConversionJob,
    touched: Instant,
    /// Tie-break for records touched within the same clock tick.
    seq: u64,
}

/// Thread-safe job registry with TTL and capacity eviction.
#[derive(Debug)]
pub struct JobStore {
    entries: Mutex<HashMap<Uuid, Entry>>,
    next_seq: AtomicU64,
    ttl: Duration,
    capacity: usize,
}

impl JobStore {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Register a new pending job and return its id.
    pub fn register(&self) -> Uuid {
        let now = Instant::now();
        let job_id = Uuid::new_v4();
        let stamp = Utc::now();

        let mut entries = self.lock();
        evict_expired(&mut entries, now, self.ttl);
        while entries.len() >= self.capacity {
            if !evict_oldest(&mut entries) {
                break;
            }
        }
        entries.insert(
            job_id,
            Entry {
                job: ConversionJob {
                    job_id,
                    status: JobStatus::Pending,
                    output_artifact_id: None,
                    error: None,
                    created_at: stamp,
                    updated_at: stamp,
                },
                touched: now,
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            },
        );
        job_id
    }

    pub fn mark_running(&self, job_id: Uuid) {
        self.update(job_id, |job| job.status = JobStatus::Running);
    }

    pub fn mark_done(&self, job_id: Uuid, output: ArtifactId) {
        self.update(job_id, |job| {
            job.status = JobStatus::Done;
            job.output_artifact_id = Some(output);
        });
    }

    pub fn mark_failed(&self, job_id: Uuid, message: String) {
        self.update(job_id, |job| {
            job.status = JobStatus::Failed;
            job.error = Some(message);
        });
    }

    /// Snapshot of a job, if it is still retained.
    pub fn get(&self, job_id: Uuid) -> Option<ConversionJob> {
        let mut entries = self.lock();
        evict_expired(&mut entries, Instant::now(), self.ttl);
        entries.get(&job_id).map(|e| e.job.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every record not updated within the TTL as of `now`.
    /// Returns how many were removed.
    pub fn evict_expired_at(&self, now: Instant) -> usize {
        evict_expired(&mut self.lock(), now, self.ttl)
    }

    fn update(&self, job_id: Uuid, apply: impl FnOnce(&mut ConversionJob)) {
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(&job_id) {
            apply(&mut entry.job);
            entry.job.updated_at = Utc::now();
            entry.touched = Instant::now();
            entry.seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        } else {
            debug!("Job {} already evicted; update dropped", job_id);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Entry>> {
        // A panic while holding the lock cannot leave the map half-updated:
        // every mutation is a single insert/remove/field write.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn evict_expired(entries: &mut HashMap<Uuid, Entry>, now: Instant, ttl: Duration) -> usize {
    let before = entries.len();
    entries.retain(|_, e| now.saturating_duration_since(e.touched) <= ttl);
    let removed = before - entries.len();
    if removed > 0 {
        debug!("Evicted {} expired job records", removed);
    }
    removed
}

/// Remove the oldest finished record, or failing that the oldest record.
fn evict_oldest(entries: &mut HashMap<Uuid, Entry>) -> bool {
    let victim = entries
        .iter()
        .filter(|(_, e)| e.job.status.is_finished())
        .min_by_key(|(_, e)| (e.touched, e.seq))
        .or_else(|| entries.iter().min_by_key(|(_, e)| (e.touched, e.seq)))
        .map(|(id, _)| *id);
    match victim {
        Some(id) => {
            entries.remove(&id);
            true
        }
        None => false,
    }
}
