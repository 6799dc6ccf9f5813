use crate::api::error::AppError;
use crate::config::ARCHIVE_EXTENSION;
use crate::models::{Archive, ConversionResult};
use bytes::Bytes;
use std::fs::File;
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const PRIVATE_KEY_MODE: u32 = 0o600;
const PUBLIC_KEY_MODE: u32 = 0o644;

/// Bundles the converted key pair into a zip archive.
pub struct Archiver {
    compression_level: i32,
}

impl Default for Archiver {
    fn default() -> Self {
        Self {
            compression_level: 9,
        }
    }
}

impl Archiver {
    pub fn new(compression_level: i32) -> Self {
        Self { compression_level }
    }

    /// Writes the archive to `archive_path`, waits for it to be flushed and
    /// closed, then reads it back into memory.
    ///
    /// Entries are named `<display_name>` and `<display_name>.pub`.
    pub async fn build(
        &self,
        outputs: &ConversionResult,
        display_name: &str,
        archive_path: &Path,
    ) -> Result<Archive, AppError> {
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(self.compression_level));

        let entries = vec![
            (
                display_name.to_string(),
                outputs.private_key.clone(),
                options.unix_permissions(PRIVATE_KEY_MODE),
            ),
            (
                format!("{}.pub", display_name),
                outputs.public_key.clone(),
                options.unix_permissions(PUBLIC_KEY_MODE),
            ),
        ];
        let target = archive_path.to_path_buf();

        tokio::task::spawn_blocking(move || write_archive(&target, entries))
            .await
            .map_err(|e| AppError::Internal(format!("Archive task failed: {}", e)))??;

        let bytes = tokio::fs::read(archive_path).await.map_err(|e| {
            AppError::Archive(format!(
                "Failed to read back {}: {}",
                archive_path.display(),
                e
            ))
        })?;

        Ok(Archive {
            file_name: format!("{}.{}", display_name, ARCHIVE_EXTENSION),
            bytes: Bytes::from(bytes),
        })
    }
}

fn write_archive(
    target: &Path,
    entries: Vec<(String, PathBuf, FileOptions)>,
) -> Result<(), AppError> {
    let file = File::create(target)
        .map_err(|e| AppError::Archive(format!("Failed to create {}: {}", target.display(), e)))?;
    let mut zip = ZipWriter::new(file);

    for (name, source, options) in entries {
        let mut input = File::open(&source).map_err(|e| {
            AppError::Archive(format!("Failed to open {}: {}", source.display(), e))
        })?;
        zip.start_file(name.as_str(), options)
            .map_err(|e| AppError::Archive(format!("Failed to add entry {}: {}", name, e)))?;
        std::io::copy(&mut input, &mut zip)
            .map_err(|e| AppError::Archive(format!("Failed to write entry {}: {}", name, e)))?;
    }

    let file = zip
        .finish()
        .map_err(|e| AppError::Archive(format!("Failed to finalize archive: {}", e)))?;
    file.sync_all()
        .map_err(|e| AppError::Archive(format!("Failed to flush archive: {}", e)))?;
    // `file` is closed here, before anyone reads the archive back
    Ok(())
}
