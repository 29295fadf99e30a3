//! Worker configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use wanvid_core::variant::Variant;

/// Default ComfyUI base URL.
pub const DEFAULT_COMFY_URL: &str = "http://127.0.0.1:8188";

/// Default workflow template location.
pub const DEFAULT_WORKFLOW_PATH: &str = "/app/workflows/wan22_t2v_api.json";

/// Default ComfyUI input directory.
pub const DEFAULT_INPUT_DIR: &str = "/comfyui/input";

/// Default ComfyUI output directory.
pub const DEFAULT_OUTPUT_DIR: &str = "/comfyui/output";

/// Default seconds to wait for ComfyUI to come up.
pub const DEFAULT_START_TIMEOUT_SECS: u64 = 900;

/// Default seconds to wait for a job's output file.
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 1800;

/// An environment variable held a value that does not parse.
#[derive(Debug, thiserror::Error)]
#[error("{var} must be {expected} (got '{value}')")]
pub struct ConfigError {
    pub var: &'static str,
    pub expected: &'static str,
    pub value: String,
}

/// Everything the handler needs to know about its surroundings.
///
/// Tests construct this directly; the binary uses [`WorkerConfig::from_env`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// ComfyUI base URL, without a trailing slash.
    pub comfy_url: String,
    /// Workflow template, read fresh for every job.
    pub workflow_path: PathBuf,
    /// Directory ComfyUI loads input images from.
    pub input_dir: PathBuf,
    /// Directory ComfyUI writes outputs to.
    pub output_dir: PathBuf,
    /// How long to wait for ComfyUI to answer `/system_stats`.
    pub start_timeout: Duration,
    /// How long to wait for a submitted job's output file.
    pub poll_timeout: Duration,
    /// Endpoint flavour.
    pub variant: Variant,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            comfy_url: DEFAULT_COMFY_URL.to_string(),
            workflow_path: PathBuf::from(DEFAULT_WORKFLOW_PATH),
            input_dir: PathBuf::from(DEFAULT_INPUT_DIR),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            start_timeout: Duration::from_secs(DEFAULT_START_TIMEOUT_SECS),
            poll_timeout: Duration::from_secs(DEFAULT_POLL_TIMEOUT_SECS),
            variant: Variant::default(),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var               | Default                             |
    /// |-----------------------|-------------------------------------|
    /// | `COMFY_URL`           | `http://127.0.0.1:8188`             |
    /// | `WORKFLOW_PATH`       | `/app/workflows/wan22_t2v_api.json` |
    /// | `COMFY_INPUT_DIR`     | `/comfyui/input`                    |
    /// | `COMFY_OUTPUT_DIR`    | `/comfyui/output`                   |
    /// | `COMFY_START_TIMEOUT` | `900`                               |
    /// | `COMFY_POLL_TIMEOUT`  | `1800`                              |
    /// | `WORKFLOW_VARIANT`    | `t2v`                               |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let comfy_url = get("COMFY_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.comfy_url);

        let variant = match get("WORKFLOW_VARIANT") {
            Some(value) => value.parse().map_err(|_| ConfigError {
                var: "WORKFLOW_VARIANT",
                expected: "'t2v' or 'ti2v'",
                value,
            })?,
            None => defaults.variant,
        };

        Ok(Self {
            comfy_url,
            workflow_path: get("WORKFLOW_PATH").map_or(defaults.workflow_path, PathBuf::from),
            input_dir: get("COMFY_INPUT_DIR").map_or(defaults.input_dir, PathBuf::from),
            output_dir: get("COMFY_OUTPUT_DIR").map_or(defaults.output_dir, PathBuf::from),
            start_timeout: secs(get("COMFY_START_TIMEOUT"), "COMFY_START_TIMEOUT")?
                .unwrap_or(defaults.start_timeout),
            poll_timeout: secs(get("COMFY_POLL_TIMEOUT"), "COMFY_POLL_TIMEOUT")?
                .unwrap_or(defaults.poll_timeout),
            variant,
        })
    }
}

fn secs(value: Option<String>, var: &'static str) -> Result<Option<Duration>, ConfigError> {
    value
        .map(|v| {
            v.trim().parse::<u64>().map(Duration::from_secs).map_err(|_| ConfigError {
                var,
                expected: "a whole number of seconds",
                value: v,
            })
        })
        .transpose()
}
