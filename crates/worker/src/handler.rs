//! The job handler: one job document in, one [`JobResult`] out.
//!
//! Steps, in order: readiness wait, image materialization, template load,
//! token mapping, rewrite, node patches, submit, poll, encode. Only a
//! ComfyUI instance that never comes up escapes as a [`HandlerError`];
//! every other failure becomes a [`JobResult::Error`] the caller can
//! return as-is.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use wanvid_comfyui::api::ComfyUIApi;
use wanvid_comfyui::runner::{NotReadyError, RunError, RunnerConfig, WorkflowRunner};
use wanvid_core::adapter;
use wanvid_core::error::CoreError;
use wanvid_core::job::{GenerationParams, JobInput};
use wanvid_core::template::replace_tokens;
use wanvid_core::tokens::build_mapping;
use wanvid_core::variant::Variant;

use crate::config::WorkerConfig;
use crate::input::{InputError, InputMaterializer};

/// Status reported for `test_mode` jobs.
pub const TEST_MODE_STATUS: &str = "ok";

/// What the invoking runtime receives for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobResult {
    /// `{"status": "ok"}`
    Status { status: String },
    /// `{"video": "data:video/mp4;base64,..."}`
    Video { video: String },
    /// `{"error": "..."}`
    Error { error: String },
}

impl JobResult {
    pub fn ok() -> Self {
        Self::Status {
            status: TEST_MODE_STATUS.to_string(),
        }
    }

    pub fn video(data_url: impl Into<String>) -> Self {
        Self::Video {
            video: data_url.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Failures that prevent the worker from handling jobs at all.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("ComfyUI is unavailable: {0}")]
    ServiceUnavailable(#[from] NotReadyError),
}

/// Per-job failures, reported back through [`JobResult::Error`].
#[derive(Debug, thiserror::Error)]
enum JobError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Failed to read workflow template {}: {source}", .path.display())]
    Template {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Run(#[from] RunError),
}

/// Wires the materializer, the core rewrite pipeline and the runner.
#[derive(Debug, Clone)]
pub struct JobHandler {
    variant: Variant,
    workflow_path: PathBuf,
    materializer: InputMaterializer,
    runner: WorkflowRunner,
}

impl JobHandler {
    /// Build a handler with production poll schedules.
    pub fn new(config: &WorkerConfig) -> Self {
        let runner = WorkflowRunner::new(
            ComfyUIApi::new(config.comfy_url.as_str()),
            RunnerConfig::new(&config.output_dir, config.start_timeout, config.poll_timeout),
        );
        Self::with_runner(config, runner)
    }

    /// Build a handler around an existing runner.
    pub fn with_runner(config: &WorkerConfig, runner: WorkflowRunner) -> Self {
        Self {
            variant: config.variant,
            workflow_path: config.workflow_path.clone(),
            materializer: InputMaterializer::new(&config.input_dir),
            runner,
        }
    }

    /// Process one job envelope (`{"input": {...}}`).
    pub async fn handle(&self, job: &Value) -> Result<JobResult, HandlerError> {
        let input = JobInput::from_job(job);

        if input.is_test_mode() {
            tracing::info!("Test mode job, skipping generation");
            return Ok(JobResult::ok());
        }

        self.runner.wait_ready().await?;

        match self.generate(&input).await {
            Ok(data_url) => Ok(JobResult::video(data_url)),
            Err(e) => {
                tracing::warn!(variant = %self.variant, error = %e, "Job failed");
                Ok(JobResult::error(e.to_string()))
            }
        }
    }

    async fn generate(&self, input: &JobInput) -> Result<String, JobError> {
        let profile = self.variant.profile();

        let image = self
            .materializer
            .resolve(input, profile.image_required)
            .await?;
        let template = load_template(&self.workflow_path).await?;

        let params = GenerationParams::from_input(input)?;
        let mapping = build_mapping(&params, Some(image.as_str()));
        let mut workflow = replace_tokens(&template, &mapping);

        let report = adapter::adapt(&mut workflow, &profile, &mapping);
        for node_id in &report.attention_patched {
            tracing::info!(node_id = %node_id, mode = adapter::PORTABLE_ATTENTION_MODE, "Forced attention mode");
        }
        if let Some(node_id) = &report.embeds_switched {
            tracing::info!(node_id = %node_id, class_type = adapter::EMPTY_EMBEDS_CLASS, "Switched embeds node");
        }

        tracing::info!(
            variant = %self.variant,
            image = %image,
            width = params.width,
            height = params.height,
            length = params.length,
            seed = params.seed,
            "Submitting workflow",
        );

        let artifact = self.runner.run(&workflow).await?;
        tracing::info!(
            path = %artifact.path.display(),
            size_bytes = artifact.bytes.len(),
            "Returning output video",
        );
        Ok(artifact.to_data_url())
    }
}

/// Read and parse the workflow template. Called once per job so edits on
/// disk take effect without a restart.
async fn load_template(path: &Path) -> Result<Value, JobError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| JobError::Template {
            path: path.to_path_buf(),
            source,
        })?;
    let template = serde_json::from_str(&text).map_err(|e| {
        CoreError::Internal(format!(
            "workflow template {} is not valid JSON: {e}",
            path.display()
        ))
    })?;
    Ok(template)
}
