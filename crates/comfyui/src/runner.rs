//! Submit-and-wait orchestration against one ComfyUI instance.
//!
//! A run moves through `WAIT_READY -> SUBMIT -> POLL -> DONE`, or ends in
//! an error from any step:
//!
//! - [`WorkflowRunner::wait_ready`] probes `/system_stats` until it answers.
//!   Failing here means the worker cannot serve jobs at all.
//! - [`WorkflowRunner::submit`] posts the workflow once, without retries.
//! - [`WorkflowRunner::wait_for_artifact`] polls `/history/{id}` until a
//!   listed output file exists on disk. A failed poll ends the wait.
//! - [`Artifact::to_data_url`] encodes the file for the job result.

use std::path::PathBuf;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::poll::{poll_until, PollConfig, PollError};

/// MIME type stamped on every returned artifact.
pub const VIDEO_MIME_TYPE: &str = "video/mp4";

/// Where outputs land and how long to wait for things.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// ComfyUI's output directory, as seen from this process.
    pub output_dir: PathBuf,
    /// Readiness probing schedule.
    pub startup: PollConfig,
    /// History polling schedule.
    pub output: PollConfig,
}

impl RunnerConfig {
    /// Production schedules with the given timeouts.
    pub fn new(output_dir: impl Into<PathBuf>, startup_timeout: Duration, output_timeout: Duration) -> Self {
        Self {
            output_dir: output_dir.into(),
            startup: PollConfig::readiness(startup_timeout),
            output: PollConfig::history(output_timeout),
        }
    }
}

/// ComfyUI never answered its liveness endpoint in time.
#[derive(Debug, thiserror::Error)]
#[error("ComfyUI did not start within {}s", .timeout.as_secs())]
pub struct NotReadyError {
    pub timeout: Duration,
}

/// Errors that end a single run. The `Display` text is user-facing.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Failed to submit prompt to ComfyUI: {0}")]
    Submit(ComfyUIApiError),

    #[error("Failed while polling ComfyUI: {0}")]
    Poll(ComfyUIApiError),

    #[error("Timed out waiting for output.")]
    TimedOut,

    #[error("Failed to read output file {}: {source}", .path.display())]
    Artifact {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A finished output file, read into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub async fn read(path: PathBuf) -> Result<Self, RunError> {
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Self { path, bytes }),
            Err(source) => Err(RunError::Artifact { path, source }),
        }
    }

    /// `data:video/mp4;base64,<...>`
    pub fn to_data_url(&self) -> String {
        format!("data:{VIDEO_MIME_TYPE};base64,{}", BASE64.encode(&self.bytes))
    }
}

/// Drives workflows through one ComfyUI instance.
#[derive(Debug, Clone)]
pub struct WorkflowRunner {
    api: ComfyUIApi,
    config: RunnerConfig,
}

impl WorkflowRunner {
    pub fn new(api: ComfyUIApi, config: RunnerConfig) -> Self {
        Self { api, config }
    }

    /// Block until `/system_stats` answers, probing on the startup schedule.
    pub async fn wait_ready(&self) -> Result<(), NotReadyError> {
        let api = &self.api;
        let result: Result<(), PollError<std::convert::Infallible>> =
            poll_until(self.config.startup, |attempt| async move {
                match api.system_stats().await {
                    Ok(_) => Ok(Some(())),
                    Err(e) => {
                        if attempt == 1 || attempt % 30 == 0 {
                            tracing::info!(attempt, error = %e, "Waiting for ComfyUI to start");
                        }
                        Ok(None)
                    }
                }
            })
            .await;

        match result {
            Ok(()) => {
                tracing::debug!(api_url = %api.api_url(), "ComfyUI is reachable");
                Ok(())
            }
            Err(PollError::TimedOut { .. }) => Err(NotReadyError {
                timeout: self.config.startup.timeout,
            }),
            Err(PollError::Aborted(never)) => match never {},
        }
    }

    /// Queue `workflow` and return its prompt id.
    pub async fn submit(&self, workflow: &serde_json::Value) -> Result<String, RunError> {
        let response = self
            .api
            .submit_workflow(workflow)
            .await
            .map_err(RunError::Submit)?;

        tracing::info!(
            prompt_id = %response.prompt_id,
            queue_number = ?response.number,
            "Workflow submitted",
        );
        Ok(response.prompt_id)
    }

    /// Poll history until the prompt lists an output file that exists.
    pub async fn wait_for_artifact(&self, prompt_id: &str) -> Result<PathBuf, RunError> {
        let api = &self.api;
        let output_dir = self.config.output_dir.as_path();

        let result: Result<PathBuf, PollError<ComfyUIApiError>> =
            poll_until(self.config.output, |attempt| async move {
                let history = match api.get_history(prompt_id).await {
                    Ok(history) => history,
                    Err(e) => return Err(e),
                };
                let Some(record) = history.get(prompt_id) else {
                    tracing::debug!(prompt_id, attempt, "Prompt not in history yet");
                    return Ok(None);
                };

                let found = record.find_artifact(output_dir);
                if found.is_none() {
                    tracing::debug!(prompt_id, attempt, "Prompt in history but no output file on disk yet");
                }
                Ok(found)
            })
            .await;

        match result {
            Ok(path) => {
                tracing::info!(prompt_id, path = %path.display(), "Output file ready");
                Ok(path)
            }
            Err(PollError::TimedOut { elapsed }) => {
                tracing::warn!(prompt_id, elapsed_secs = elapsed.as_secs(), "Timed out waiting for output");
                Err(RunError::TimedOut)
            }
            Err(PollError::Aborted(e)) => {
                tracing::error!(prompt_id, error = %e, "Polling ComfyUI failed");
                Err(RunError::Poll(e))
            }
        }
    }

    /// Submit, wait for the output file, and read it.
    pub async fn run(&self, workflow: &serde_json::Value) -> Result<Artifact, RunError> {
        let prompt_id = self.submit(workflow).await?;
        let path = self.wait_for_artifact(&prompt_id).await?;
        Artifact::read(path).await
    }
}
