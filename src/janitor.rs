//! Background reclamation of expired artifacts.
//!
//! Eager disposal in the request path removes almost every file. The janitor
//! is the backstop: it finds what that path missed (a crashed process, a
//! failed `unlink`, outputs kept under [`RetentionMode::Janitor`]) and deletes
//! anything older than the retention window.
//!
//! One sweep lists every area and disposes expired artifacts. A failure on one
//! artifact is counted and logged and the sweep moves on. [`Janitor::spawn`]
//! runs sweeps on a fixed interval until [`JanitorHandle::shutdown`] is
//! called. The first sweep runs immediately, so orphans left by a previous
//! process are reclaimed at start-up.
//!
//! The janitor talks to the store only through `list` and `dispose`, which
//! are safe to race with requests disposing the same files.
//!
//! [`RetentionMode::Janitor`]: crate::config::RetentionMode::Janitor

use crate::config::ServiceConfig;
use crate::store::{Area, ArtifactStore, Disposal};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// When to sweep and what counts as expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JanitorPolicy {
    pub sweep_interval: Duration,
    pub retention_window: Duration,
}

impl From<&ServiceConfig> for JanitorPolicy {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            sweep_interval: config.sweep_interval,
            retention_window: config.retention_window,
        }
    }
}

/// Counters from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Artifacts looked at across all areas.
    pub scanned: usize,
    pub removed: usize,
    /// Expired but vanished before disposal (eager path got there first).
    pub already_gone: usize,
    pub failed: usize,
    /// Younger than the retention window.
    pub retained: usize,
    /// Areas that could not be listed.
    pub unreadable_areas: usize,
}

/// Age-based sweeper over an [`ArtifactStore`].
#[derive(Debug, Clone)]
pub struct Janitor {
    store: Arc<ArtifactStore>,
    policy: JanitorPolicy,
}

impl Janitor {
    pub fn new(store: Arc<ArtifactStore>, policy: JanitorPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> JanitorPolicy {
        self.policy
    }

    /// Sweep every area once, using the current time.
    pub async fn sweep_once(&self) -> SweepReport {
        self.sweep_at(SystemTime::now()).await
    }

    /// Sweep every area once as if the time were `now`.
    ///
    /// An artifact is expired when `now - created_at > retention_window`.
    /// Artifacts with no readable creation time are left alone.
    pub async fn sweep_at(&self, now: SystemTime) -> SweepReport {
        let mut report = SweepReport::default();

        for area in Area::ALL {
            let artifacts = match self.store.list(area).await {
                Ok(artifacts) => artifacts,
                Err(e) => {
                    warn!("Janitor could not list {}: {}", area, e);
                    report.unreadable_areas += 1;
                    continue;
                }
            };

            for artifact in artifacts {
                report.scanned += 1;
                let expired = artifact
                    .age(now)
                    .is_some_and(|age| age > self.policy.retention_window);
                if !expired {
                    report.retained += 1;
                    continue;
                }
                match self.store.dispose(&artifact) {
                    Disposal::Removed => {
                        debug!("Janitor reclaimed {} artifact {}", area, artifact.id);
                        report.removed += 1;
                    }
                    Disposal::AlreadyGone => report.already_gone += 1,
                    Disposal::Failed => report.failed += 1,
                }
            }
        }

        if report.removed > 0 || report.failed > 0 {
            info!(
                "Janitor sweep: {} scanned, {} removed, {} failed, {} retained",
                report.scanned, report.removed, report.failed, report.retained
            );
        } else {
            debug!(
                "Janitor sweep: {} scanned, nothing expired",
                report.scanned
            );
        }
        report
    }

    /// Run sweeps on the policy interval in a background task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(self) -> JanitorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let interval = self.policy.sweep_interval;

        let task = tokio::spawn(async move {
            info!(
                "Janitor started: sweep every {:?}, retention {:?}",
                interval, self.policy.retention_window
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep_once().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Janitor stopped");
        });

        JanitorHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running janitor task.
#[derive(Debug)]
pub struct JanitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl JanitorHandle {
    /// Signal the task to stop and wait for it. A sweep in progress finishes
    /// first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("Janitor task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
