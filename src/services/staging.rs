use crate::api::error::AppError;
use crate::models::{StagedFile, stored_name};
use bytes::Bytes;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Writes validated uploads into the uploads directory under a fresh token.
pub struct StagingStore {
    uploads_dir: PathBuf,
}

impl StagingStore {
    pub fn new(uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            uploads_dir: uploads_dir.into(),
        }
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    /// Stages `data` at `<uploads>/<token>_<original_name>`, with overlong stems shortened.
    ///
    /// Bytes land in a hidden temp file first and are renamed into place, so the
    /// final path either holds the whole upload or does not exist.
    pub async fn stage(&self, original_name: &str, data: Bytes) -> Result<StagedFile, AppError> {
        tokio::fs::create_dir_all(&self.uploads_dir)
            .await
            .map_err(|e| AppError::storage(&self.uploads_dir, e))?;

        let token = Uuid::new_v4();
        let path = self
            .uploads_dir
            .join(format!("{}_{}", token, stored_name(original_name)));
        let dir = self.uploads_dir.clone();
        let target = path.clone();

        tokio::task::spawn_blocking(move || write_atomically(&dir, &target, &data))
            .await
            .map_err(|e| AppError::Internal(format!("Staging task failed: {}", e)))?
            .map_err(|e| AppError::storage(&path, e))?;

        tracing::debug!(%token, path = %path.display(), "Upload staged");

        Ok(StagedFile {
            token,
            original_name: original_name.to_string(),
            path,
        })
    }
}

fn write_atomically(dir: &Path, target: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut temp = tempfile::Builder::new()
        .prefix(".staging-")
        .tempfile_in(dir)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    // A dropped temp file is removed, so a failed persist leaves nothing behind
    temp.persist_noclobber(target).map_err(|e| e.error)?;
    Ok(())
}
