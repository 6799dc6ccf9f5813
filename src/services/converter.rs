use crate::api::error::AppError;
use crate::models::{ConversionResult, KeyFormat, StagedFile};
use crate::services::retention::Artifacts;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Semaphore;

#[derive(Debug, Error)]
pub enum ConverterError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{format} conversion exited with {status}: {stderr}")]
    Failed {
        format: KeyFormat,
        status: String,
        stderr: String,
    },

    #[error("{format} conversion reported success but wrote no output at {}", .path.display())]
    MissingOutput { format: KeyFormat, path: PathBuf },

    #[error("{format} conversion timed out after {timeout:?}")]
    TimedOut { format: KeyFormat, timeout: Duration },

    #[error("{0}")]
    Other(String),
}

impl From<ConverterError> for AppError {
    fn from(e: ConverterError) -> Self {
        AppError::Conversion(e.to_string())
    }
}

/// Turns a source-format key into one target-format file.
///
/// Implementations must write exactly `output` and keep no state between
/// calls, so concurrent requests never see each other's files.
#[async_trait::async_trait]
pub trait KeyConverter: Send + Sync {
    async fn convert(
        &self,
        input: &Path,
        format: KeyFormat,
        output: &Path,
    ) -> Result<(), ConverterError>;

    /// Check if the converter is available
    async fn health_check(&self) -> bool;
}

/// Shells out to PuTTY's `puttygen`.
///
/// ```bash
/// apt-get install putty-tools
/// ```
pub struct PuttygenConverter {
    program: PathBuf,
}

impl PuttygenConverter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait::async_trait]
impl KeyConverter for PuttygenConverter {
    async fn convert(
        &self,
        input: &Path,
        format: KeyFormat,
        output: &Path,
    ) -> Result<(), ConverterError> {
        // Arguments are passed verbatim, never through a shell
        let result = Command::new(&self.program)
            .arg(input)
            .arg("-O")
            .arg(format.as_puttygen_arg())
            .arg("-o")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ConverterError::Spawn {
                program: self.program.display().to_string(),
                source: e,
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
            return Err(ConverterError::Failed {
                format,
                status: result.status.to_string(),
                stderr,
            });
        }

        match tokio::fs::try_exists(output).await {
            Ok(true) => Ok(()),
            _ => Err(ConverterError::MissingOutput {
                format,
                path: output.to_path_buf(),
            }),
        }
    }

    async fn health_check(&self) -> bool {
        match Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
        {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }
}

/// Runs both conversions for a staged upload under a timeout and a
/// process-wide concurrency limit.
pub struct ConversionRunner {
    converter: Arc<dyn KeyConverter>,
    converted_dir: PathBuf,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl ConversionRunner {
    pub fn new(
        converter: Arc<dyn KeyConverter>,
        converted_dir: impl Into<PathBuf>,
        timeout: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            converter,
            converted_dir: converted_dir.into(),
            timeout,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn converted_dir(&self) -> &Path {
        &self.converted_dir
    }

    /// Produces `<converted>/<base>` and `<converted>/<base>.pub`.
    ///
    /// Both paths are tracked in `artifacts` before the tool runs.
    pub async fn convert(
        &self,
        staged: &StagedFile,
        artifacts: &mut Artifacts,
    ) -> Result<ConversionResult, AppError> {
        tokio::fs::create_dir_all(&self.converted_dir)
            .await
            .map_err(|e| AppError::storage(&self.converted_dir, e))?;

        let base = staged.base_name();
        let outputs = ConversionResult {
            private_key: self.converted_dir.join(&base),
            public_key: self.converted_dir.join(format!("{}.pub", base)),
        };
        artifacts.track_private_key(&outputs.private_key);
        artifacts.track_public_key(&outputs.public_key);

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| AppError::Internal("Conversion semaphore closed".to_string()))?;

        self.invoke(&staged.path, KeyFormat::PrivateOpenSsh, &outputs.private_key)
            .await?;
        self.invoke(&staged.path, KeyFormat::PublicOpenSsh, &outputs.public_key)
            .await?;

        Ok(outputs)
    }

    async fn invoke(
        &self,
        input: &Path,
        format: KeyFormat,
        output: &Path,
    ) -> Result<(), ConverterError> {
        match tokio::time::timeout(self.timeout, self.converter.convert(input, format, output))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ConverterError::TimedOut {
                format,
                timeout: self.timeout,
            }),
        }
    }
}
