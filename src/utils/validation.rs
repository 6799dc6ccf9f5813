use crate::config::SOURCE_EXTENSION;
use std::path::Path;
use thiserror::Error;

/// Client-caused rejection of an upload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please select a file")]
    MissingFile,

    #[error("File must be below {max_mb} MB")]
    SizeExceeded { max_mb: usize },

    #[error("File must be putty format (.ppk)")]
    BadExtension,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::MissingFile => "MISSING_FILE",
            ValidationError::SizeExceeded { .. } => "FILE_TOO_LARGE",
            ValidationError::BadExtension => "INVALID_EXTENSION",
        }
    }
}

/// Checks presence, size and extension of an upload. Touches nothing on disk.
pub fn validate_upload(
    file_name: Option<&str>,
    size: usize,
    max_size: usize,
) -> Result<(), ValidationError> {
    let file_name = match file_name {
        Some(name) if !name.trim().is_empty() => name,
        _ => return Err(ValidationError::MissingFile),
    };

    validate_file_size(size, max_size)?;
    validate_extension(file_name)
}

/// Validates file size against maximum limit
pub fn validate_file_size(size: usize, max_size: usize) -> Result<(), ValidationError> {
    if size > max_size {
        return Err(ValidationError::SizeExceeded {
            max_mb: max_size / 1024 / 1024,
        });
    }
    Ok(())
}

/// Case-insensitive match of the final extension against `.ppk`
pub fn validate_extension(file_name: &str) -> Result<(), ValidationError> {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase());

    match extension {
        Some(ext) if ext == SOURCE_EXTENSION => Ok(()),
        _ => Err(ValidationError::BadExtension),
    }
}

/// Reduces a client-declared filename to a safe single path component.
/// Returns `None` if nothing usable is left.
pub fn sanitize_filename(filename: &str) -> Option<String> {
    // Browsers on Windows may send full paths
    let last = filename.rsplit(['/', '\\']).next().unwrap_or("");
    let name = Path::new(last)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    if name.is_empty() || name == "." || name == ".." {
        return None;
    }

    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        tracing::warn!("Path components stripped from upload filename: {}", filename);
    }

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control()
                || c == ':'
                || c == '*'
                || c == '?'
                || c == '"'
                || c == '<'
                || c == '>'
                || c == '|'
                || c == ';'
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    Some(sanitized)
}
