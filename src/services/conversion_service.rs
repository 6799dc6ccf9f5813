use crate::api::error::AppError;
use crate::config::{ARCHIVE_EXTENSION, ConverterConfig};
use crate::models::{Archive, RequestStage, UploadRequest};
use crate::services::archiver::Archiver;
use crate::services::converter::{ConversionRunner, KeyConverter};
use crate::services::retention::Artifacts;
use crate::services::staging::StagingStore;
use crate::utils::validation::{sanitize_filename, validate_upload};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Final value of a conversion request
pub type Outcome = Result<Archive, AppError>;

/// Validate -> stage -> convert -> archive -> cleanup, one request at a time.
pub struct ConversionService {
    config: Arc<ConverterConfig>,
    staging: StagingStore,
    runner: ConversionRunner,
    archiver: Archiver,
}

impl ConversionService {
    pub fn new(config: Arc<ConverterConfig>, converter: Arc<dyn KeyConverter>) -> Self {
        let staging = StagingStore::new(&config.uploads_dir);
        let runner = ConversionRunner::new(
            converter,
            &config.converted_dir,
            config.conversion_timeout(),
            config.max_concurrent_conversions,
        );
        Self {
            config,
            staging,
            runner,
            archiver: Archiver::default(),
        }
    }

    /// Runs the whole pipeline. Every artifact created on the way has been
    /// deleted by the time this returns, whatever the outcome.
    pub async fn process(&self, upload: UploadRequest) -> Outcome {
        self.process_tracked(upload).await.0
    }

    async fn process_tracked(&self, upload: UploadRequest) -> (Outcome, Vec<RequestStage>) {
        let mut tracker = StageTracker::new();

        if let Err(e) = validate_upload(
            upload.file_name.as_deref(),
            upload.declared_size.max(upload.data.len()),
            self.config.max_file_size_bytes(),
        ) {
            tracing::info!(reason = %e, "Upload rejected");
            tracker.fail(&e.to_string());
            // Nothing was written, so cleanup is trivially complete
            tracker.advance(RequestStage::Cleaned);
            tracker.advance(RequestStage::Responded);
            return (Err(e.into()), tracker.history);
        }
        tracker.advance(RequestStage::Validated);

        let mut artifacts = Artifacts::new();
        let outcome = self.run_stages(upload, &mut tracker, &mut artifacts).await;

        if let Err(e) = &outcome {
            tracker.fail(e.code());
        }

        let removed = artifacts.purge().await;
        tracing::debug!(token = ?tracker.token, removed = removed.len(), "Artifacts purged");
        tracker.advance(RequestStage::Cleaned);
        // The handler turns the outcome into a response without further I/O
        tracker.advance(RequestStage::Responded);

        (outcome, tracker.history)
    }

    async fn run_stages(
        &self,
        upload: UploadRequest,
        tracker: &mut StageTracker,
        artifacts: &mut Artifacts,
    ) -> Outcome {
        let original_name = upload
            .file_name
            .as_deref()
            .and_then(sanitize_filename)
            .ok_or_else(|| AppError::BadRequest("Invalid file name".to_string()))?;

        let staged = self.staging.stage(&original_name, upload.data).await?;
        artifacts.track_staged(&staged.path);
        tracker.token = Some(staged.token);
        tracker.advance(RequestStage::Staged);

        let outputs = self.runner.convert(&staged, artifacts).await?;
        tracker.advance(RequestStage::Converted);

        let archive_path = self
            .runner
            .converted_dir()
            .join(format!("{}.{}", staged.base_name(), ARCHIVE_EXTENSION));
        artifacts.track_archive(&archive_path);

        let archive = self
            .archiver
            .build(&outputs, staged.display_name(), &archive_path)
            .await?;
        tracker.advance(RequestStage::Archived);

        Ok(archive)
    }
}

/// Records stage transitions of one request in the logs
struct StageTracker {
    token: Option<Uuid>,
    stage: RequestStage,
    history: Vec<RequestStage>,
    started: Instant,
}

impl StageTracker {
    fn new() -> Self {
        tracing::debug!(stage = %RequestStage::Received, "Conversion request received");
        Self {
            token: None,
            stage: RequestStage::Received,
            history: vec![RequestStage::Received],
            started: Instant::now(),
        }
    }

    fn advance(&mut self, next: RequestStage) {
        tracing::debug!(
            token = ?self.token,
            from = %self.stage,
            to = %next,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Stage transition"
        );
        self.stage = next;
        self.history.push(next);
    }

    fn fail(&mut self, reason: &str) {
        tracing::warn!(
            token = ?self.token,
            stage = %self.stage,
            reason,
            "Conversion request failed"
        );
        self.stage = RequestStage::Failed;
        self.history.push(RequestStage::Failed);
    }
}
