use crate::services::retention::sweep_stale;
use std::path::PathBuf;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

/// Periodically removes artifacts left behind by a crashed or killed process.
pub struct ArtifactSweeper {
    dirs: Vec<PathBuf>,
    max_age: Duration,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl ArtifactSweeper {
    pub fn new(
        dirs: Vec<PathBuf>,
        max_age: Duration,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            dirs,
            max_age,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("🧹 Artifact sweeper started");

        // Residue from a previous run goes first
        self.sweep().await;

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Artifact sweeper shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    self.sweep().await;
                }
            }
        }
    }

    /// One pass over every directory. Returns the number of files removed.
    pub async fn sweep(&self) -> usize {
        let mut total = 0;
        for dir in &self.dirs {
            match sweep_stale(dir, self.max_age).await {
                Ok(removed) => total += removed,
                Err(e) => tracing::error!("Failed to sweep {}: {}", dir.display(), e),
            }
        }
        if total > 0 {
            tracing::info!("Swept {} stale artifact(s)", total);
        }
        total
    }
}
