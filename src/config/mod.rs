use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Extension (lowercase, without dot) accepted for uploads
pub const SOURCE_EXTENSION: &str = "ppk";

/// Extension of the archive returned to the caller
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Runtime configuration for the conversion service
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    /// Maximum upload size in megabytes (default: 1 MB)
    pub max_file_size_mb: usize,

    /// Directory receiving staged uploads (default: "data/uploads")
    pub uploads_dir: PathBuf,

    /// Directory receiving converted keys and archives (default: sibling "converted")
    pub converted_dir: PathBuf,

    /// Allowed CORS Origins (comma separated)
    pub allowed_origins: Vec<String>,

    /// Path or name of the puttygen executable (default: "puttygen")
    pub converter_program: PathBuf,

    /// Upper bound for a single converter invocation in seconds (default: 30)
    pub conversion_timeout_secs: u64,

    /// Maximum number of converter processes running at once (default: 8)
    pub max_concurrent_conversions: usize,

    /// Age after which leftover artifacts are swept in seconds (default: 600)
    pub stale_artifact_age_secs: u64,

    /// Interval between sweeps in seconds (default: 300)
    pub sweep_interval_secs: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        let uploads_dir = PathBuf::from("data/uploads");
        let converted_dir = sibling_converted_dir(&uploads_dir);
        Self {
            max_file_size_mb: 1,
            uploads_dir,
            converted_dir,
            allowed_origins: vec!["http://localhost:5173".to_string()], // Vite default
            converter_program: PathBuf::from("puttygen"),
            conversion_timeout_secs: 30,
            max_concurrent_conversions: 8,
            stale_artifact_age_secs: 600,
            sweep_interval_secs: 300,
        }
    }
}

impl ConverterConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        let uploads_dir = env::var("UPLOADS_DIR")
            .map(PathBuf::from)
            .unwrap_or(default.uploads_dir);

        let converted_dir = env::var("CONVERTED_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| sibling_converted_dir(&uploads_dir));

        // ALLOWED_ORIGINS wins over the single-origin FRONTEND_URL
        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .or_else(|_| env::var("FRONTEND_URL"))
            .ok()
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|origins| !origins.is_empty())
            .unwrap_or(default.allowed_origins);

        Self {
            max_file_size_mb: env::var("MAX_FILE_UPLOAD_MB")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size_mb),

            uploads_dir,
            converted_dir,
            allowed_origins,

            converter_program: env::var("PUTTYGEN_PATH")
                .map(PathBuf::from)
                .unwrap_or(default.converter_program),

            conversion_timeout_secs: env::var("CONVERSION_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &u64| *n > 0)
                .unwrap_or(default.conversion_timeout_secs),

            max_concurrent_conversions: env::var("MAX_CONCURRENT_CONVERSIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(default.max_concurrent_conversions),

            stale_artifact_age_secs: env::var("STALE_ARTIFACT_AGE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.stale_artifact_age_secs),

            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &u64| *n > 0)
                .unwrap_or(default.sweep_interval_secs),
        }
    }

    /// Create config rooted at `root` with relaxed limits (used by tests and local runs)
    pub fn development(root: &Path) -> Self {
        Self {
            max_file_size_mb: 1,
            uploads_dir: root.join("uploads"),
            converted_dir: root.join("converted"),
            allowed_origins: vec![
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ],
            converter_program: PathBuf::from("puttygen"),
            conversion_timeout_secs: 5,
            max_concurrent_conversions: 4,
            stale_artifact_age_secs: 60,
            sweep_interval_secs: 60,
        }
    }

    /// Maximum upload size in bytes
    pub fn max_file_size_bytes(&self) -> usize {
        self.max_file_size_mb * 1024 * 1024
    }

    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.conversion_timeout_secs)
    }

    pub fn stale_artifact_age(&self) -> Duration {
        Duration::from_secs(self.stale_artifact_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn sibling_converted_dir(uploads_dir: &Path) -> PathBuf {
    match uploads_dir.parent() {
        Some(parent) => parent.join("converted"),
        None => PathBuf::from("converted"),
    }
}
