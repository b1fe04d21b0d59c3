use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backup::RecordingBackup;
use crate::engine::TranscriptionEngine;

/// Periodic tasks that live as long as the process, stopped through one token.
pub struct BackgroundTasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            handles: Vec::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    /// Cancels every task and waits for them to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }
        debug!("Background tasks stopped");
    }
}

/// Evicts held sessions whose grace period has elapsed.
pub fn spawn_session_reaper(
    engine: Arc<TranscriptionEngine>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = interval.as_millis() as u64, "Session reaper started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let reaped = engine.reap_expired();
                    if reaped > 0 {
                        info!(reaped, held = engine.held_count(), "Expired sessions reaped");
                    }
                }
            }
        }
        debug!("Session reaper stopped");
    })
}

/// Deletes WAV backups older than `retention`.
pub fn spawn_backup_reaper(
    backup: RecordingBackup,
    retention: Duration,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(dir = %backup.dir().display(), retention_secs = retention.as_secs(), "Backup reaper started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let backup = backup.clone();
                    match tokio::task::spawn_blocking(move || backup.reap_older_than(retention)).await {
                        Ok(0) => {}
                        Ok(removed) => info!(removed, "Expired backups removed"),
                        Err(e) => warn!("Backup reaper pass failed: {}", e),
                    }
                }
            }
        }
        debug!("Backup reaper stopped");
    })
}
