use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// On-disk artifacts created for one request.
///
/// Paths are registered before the stage that writes them runs, so a stage
/// that fails halfway still has its partial output purged.
#[derive(Debug, Default)]
pub struct Artifacts {
    staged: Option<PathBuf>,
    private_key: Option<PathBuf>,
    public_key: Option<PathBuf>,
    archive: Option<PathBuf>,
}

impl Artifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_staged(&mut self, path: impl Into<PathBuf>) {
        self.staged = Some(path.into());
    }

    pub fn track_private_key(&mut self, path: impl Into<PathBuf>) {
        self.private_key = Some(path.into());
    }

    pub fn track_public_key(&mut self, path: impl Into<PathBuf>) {
        self.public_key = Some(path.into());
    }

    pub fn track_archive(&mut self, path: impl Into<PathBuf>) {
        self.archive = Some(path.into());
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_none()
            && self.private_key.is_none()
            && self.public_key.is_none()
            && self.archive.is_none()
    }

    /// Derived outputs first, the upload they came from last
    fn take_in_purge_order(&mut self) -> Vec<PathBuf> {
        [
            self.archive.take(),
            self.public_key.take(),
            self.private_key.take(),
            self.staged.take(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Deletes every tracked artifact. Failures are logged, never returned.
    /// Returns the paths actually removed, in deletion order.
    pub async fn purge(&mut self) -> Vec<PathBuf> {
        let mut removed = Vec::new();
        for path in self.take_in_purge_order() {
            if remove_artifact(&path).await {
                removed.push(path);
            }
        }
        removed
    }
}

impl Drop for Artifacts {
    fn drop(&mut self) {
        let leftovers = self.take_in_purge_order();
        if leftovers.is_empty() {
            return;
        }

        tracing::warn!(
            count = leftovers.len(),
            "Artifacts dropped without purge, removing synchronously"
        );
        for path in leftovers {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != ErrorKind::NotFound {
                    tracing::error!("Failed to remove {}: {}", path.display(), e);
                }
            }
        }
    }
}

async fn remove_artifact(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!("Artifact already absent: {}", path.display());
            false
        }
        Err(e) => {
            tracing::warn!("Failed to remove artifact {}: {}", path.display(), e);
            false
        }
    }
}

/// Removes regular files in `dir` last modified more than `max_age` ago.
/// Returns the number of files removed. A missing directory counts as clean.
pub async fn sweep_stale(dir: &Path, max_age: Duration) -> std::io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let now = SystemTime::now();
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await? {
        let metadata = match entry.metadata().await {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!("Skipping {}: {}", entry.path().display(), e);
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();

        if age >= max_age && remove_artifact(&entry.path()).await {
            tracing::info!("Swept stale artifact {}", entry.path().display());
            removed += 1;
        }
    }

    Ok(removed)
}
