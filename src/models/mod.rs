use bytes::Bytes;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// A single key upload as received from the multipart body.
///
/// `file_name` is `None` when the form carried no file at all.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: Option<String>,
    pub data: Bytes,
    pub declared_size: usize,
}

impl UploadRequest {
    pub fn new(file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            file_name: Some(file_name.into()),
            declared_size: data.len(),
            data,
        }
    }
}

/// An upload written to the uploads directory as `<token>_<original>`.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub token: Uuid,
    pub original_name: String,
    pub path: PathBuf,
}

impl StagedFile {
    /// `<token>_<stem>`, the base every derived artifact is named from.
    /// The stem is shortened so derived names stay within filesystem limits.
    pub fn base_name(&self) -> String {
        format!(
            "{}_{}",
            self.token,
            truncate_bytes(original_stem(&self.original_name), MAX_STORED_STEM_BYTES)
        )
    }

    /// The name the caller uploaded, without token and without extension
    pub fn display_name(&self) -> &str {
        original_stem(&self.original_name)
    }
}

/// Output formats requested from the converter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    PrivateOpenSsh,
    PublicOpenSsh,
}

impl KeyFormat {
    /// puttygen `-O` argument
    pub fn as_puttygen_arg(&self) -> &'static str {
        match self {
            KeyFormat::PrivateOpenSsh => "private-openssh",
            KeyFormat::PublicOpenSsh => "public-openssh",
        }
    }
}

impl fmt::Display for KeyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_puttygen_arg())
    }
}

/// The two converter outputs, siblings in the converted directory
#[derive(Debug, Clone)]
pub struct ConversionResult {
    pub private_key: PathBuf,
    pub public_key: PathBuf,
}

/// Finished archive held in memory
#[derive(Debug, Clone)]
pub struct Archive {
    pub file_name: String,
    pub bytes: Bytes,
}

/// Lifecycle of a single conversion request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStage {
    Received,
    Validated,
    Staged,
    Converted,
    Archived,
    Cleaned,
    Responded,
    Failed,
}

impl fmt::Display for RequestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestStage::Received => "received",
            RequestStage::Validated => "validated",
            RequestStage::Staged => "staged",
            RequestStage::Converted => "converted",
            RequestStage::Archived => "archived",
            RequestStage::Cleaned => "cleaned",
            RequestStage::Responded => "responded",
            RequestStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Strips the final extension: `hostkey.ppk` -> `hostkey`, `my.key.ppk` -> `my.key`
pub fn original_stem(file_name: &str) -> &str {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    }
}

/// Longest stem used in on-disk names. Token, separator and a `.pub`/`.zip`
/// suffix still fit in 255 bytes.
pub const MAX_STORED_STEM_BYTES: usize = 200;

/// On-disk form of an uploaded name: the stem is shortened, the extension kept.
pub fn stored_name(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            format!("{}.{}", truncate_bytes(stem, MAX_STORED_STEM_BYTES), ext)
        }
        _ => truncate_bytes(file_name, MAX_STORED_STEM_BYTES).to_string(),
    }
}

fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
