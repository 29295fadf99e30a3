//! `wanvid-worker` -- runs one Wan video job against a local ComfyUI.
//!
//! Reads a job document (`{"input": {...}}`) and prints the JSON result
//! to stdout. Logs go to stderr.
//!
//! The job is taken from, in order: the path given as the first
//! argument, `test_input.json` in the working directory, or stdin.
//! See [`WorkerConfig::from_env`] for the environment variables.

use std::io::Read;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wanvid_worker::config::WorkerConfig;
use wanvid_worker::handler::{JobHandler, JobResult};

/// Job file picked up when no argument is given.
const LOCAL_JOB_FILE: &str = "test_input.json";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wanvid_worker=info,wanvid_comfyui=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = WorkerConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        comfy_url = %config.comfy_url,
        workflow = %config.workflow_path.display(),
        variant = %config.variant,
        start_timeout_secs = config.start_timeout.as_secs(),
        poll_timeout_secs = config.poll_timeout.as_secs(),
        "Worker starting",
    );

    let job = read_job(std::env::args().nth(1).map(PathBuf::from)).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to read job");
        std::process::exit(1);
    });

    let result = match JobHandler::new(&config).handle(&job).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "Worker cannot serve jobs");
            std::process::exit(1);
        }
    };

    print_result(&result);
}

fn read_job(arg: Option<PathBuf>) -> Result<Value, String> {
    let local = Path::new(LOCAL_JOB_FILE);
    let text = match arg {
        Some(path) => read_file(&path)?,
        None if local.is_file() => read_file(local)?,
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .map_err(|e| format!("stdin: {e}"))?;
            text
        }
    };
    serde_json::from_str(&text).map_err(|e| format!("job is not valid JSON: {e}"))
}

fn read_file(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))
}

fn print_result(result: &JobResult) {
    match serde_json::to_string(result) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize job result");
            std::process::exit(1);
        }
    }
}
