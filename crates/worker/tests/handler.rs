//! End-to-end tests for [`JobHandler`] against a mocked ComfyUI.
//!
//! Each test gets a temporary directory holding the workflow template and
//! the input/output folders ComfyUI would share with the worker.

use std::path::Path;
use std::time::Duration;

use assert_matches::assert_matches;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use mockito::Matcher;
use serde_json::{json, Value};

use wanvid_comfyui::api::ComfyUIApi;
use wanvid_comfyui::poll::PollConfig;
use wanvid_comfyui::runner::{RunnerConfig, WorkflowRunner};
use wanvid_core::variant::Variant;
use wanvid_worker::config::WorkerConfig;
use wanvid_worker::handler::{HandlerError, JobHandler, JobResult};
use wanvid_worker::input::PLACEHOLDER_FILENAME;

const PROMPT_ID: &str = "b2c4-prompt";
const VIDEO_BYTES: &[u8] = b"\x00\x00\x00\x18ftypmp42fake";

fn template() -> Value {
    json!({
        "6": {"class_type": "WanVideoTextEncode", "inputs": {"positive_prompt": "__PROMPT__", "negative_prompt": "__NEGATIVE__"}},
        "27": {"class_type": "WanVideoSampler", "inputs": {"steps": "__STEPS__", "cfg": "__CFG__", "seed": "__SEED__", "scheduler": "__SCHEDULER__"}},
        "58": {"class_type": "LoadImage", "inputs": {"image": "__IMAGE_FILENAME__"}},
        "122": {"class_type": "WanVideoModelLoader", "inputs": {"model": "wan2.2_high.safetensors", "attention_mode": "sageattn"}},
        "541": {
            "class_type": "WanVideoImageToVideoEncode",
            "inputs": {"width": "__WIDTH__", "height": "__HEIGHT__", "num_frames": "__LENGTH__", "start_image": ["58", 0], "vae": ["38", 0]}
        },
        "30": {"class_type": "VHS_VideoCombine", "inputs": {"filename_prefix": "wan_s__SEED__"}}
    })
}

struct Fixture {
    dir: tempfile::TempDir,
    config: WorkerConfig,
}

impl Fixture {
    fn new(url: &str, variant: Variant) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let workflow_path = dir.path().join("workflow.json");
        std::fs::write(&workflow_path, template().to_string()).unwrap();
        std::fs::create_dir_all(dir.path().join("output/wan")).unwrap();

        let config = WorkerConfig {
            comfy_url: url.to_string(),
            workflow_path,
            input_dir: dir.path().join("input"),
            output_dir: dir.path().join("output"),
            start_timeout: Duration::from_millis(200),
            poll_timeout: Duration::from_millis(300),
            variant,
        };
        Self { dir, config }
    }

    fn handler(&self) -> JobHandler {
        let runner = WorkflowRunner::new(
            ComfyUIApi::new(self.config.comfy_url.as_str()),
            RunnerConfig {
                output_dir: self.config.output_dir.clone(),
                startup: PollConfig::new(Duration::from_millis(10), self.config.start_timeout),
                output: PollConfig::new(Duration::from_millis(10), self.config.poll_timeout),
            },
        );
        JobHandler::with_runner(&self.config, runner)
    }

    fn write_output(&self, name: &str) {
        std::fs::write(self.config.output_dir.join("wan").join(name), VIDEO_BYTES).unwrap();
    }

    fn input_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.config.input_dir)
            .map(|entries| {
                entries
                    .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }
}

fn job(input: Value) -> Value {
    json!({ "input": input })
}

async fn mock_ready(server: &mut mockito::ServerGuard) -> mockito::Mock {
    server
        .mock("GET", "/system_stats")
        .with_status(200)
        .with_body(r#"{"system": {}}"#)
        .create_async()
        .await
}

async fn mock_history(server: &mut mockito::ServerGuard, filename: &str) -> mockito::Mock {
    let body = json!({
        PROMPT_ID: {
            "outputs": {"30": {"gifs": [{"filename": filename, "subfolder": "wan", "type": "output"}]}}
        }
    });
    server
        .mock("GET", format!("/history/{PROMPT_ID}").as_str())
        .with_status(200)
        .with_body(body.to_string())
        .create_async()
        .await
}

fn submit_ok() -> String {
    json!({"prompt_id": PROMPT_ID, "number": 0}).to_string()
}

// Mocks are unregistered when dropped, so every one is bound to a name.

// ---------------------------------------------------------------------------
// Text to video
// ---------------------------------------------------------------------------

#[tokio::test]
async fn t2v_job_without_image_returns_video() {
    let mut server = mockito::Server::new_async().await;
    let fx = Fixture::new(&server.url(), Variant::T2v);
    fx.write_output("wan_00001.mp4");

    let _ready = mock_ready(&mut server).await;
    let submit = server
        .mock("POST", "/prompt")
        .match_body(Matcher::PartialJson(json!({
            "prompt": {
                "6": {"inputs": {"positive_prompt": "a cat", "negative_prompt": ""}},
                "27": {"inputs": {"steps": 10, "cfg": 2.0, "seed": 42, "scheduler": "dpm++_sde"}},
                "58": {"inputs": {"image": PLACEHOLDER_FILENAME}},
                "122": {"inputs": {"attention_mode": "sdpa"}},
                "541": {
                    "class_type": "WanVideoEmptyEmbeds",
                    "inputs": {"empty_latent_width": 512, "empty_latent_height": 512, "num_frames": 81}
                },
                "30": {"inputs": {"filename_prefix": "wan_s42"}}
            }
        })))
        .with_status(200)
        .with_body(submit_ok())
        .expect(1)
        .create_async()
        .await;
    let _history = mock_history(&mut server, "wan_00001.mp4").await;

    let result = fx
        .handler()
        .handle(&job(json!({"prompt": "a cat", "width": 512, "height": 512})))
        .await
        .unwrap();

    let expected = format!("data:video/mp4;base64,{}", BASE64.encode(VIDEO_BYTES));
    assert_eq!(result, JobResult::video(expected));
    assert_eq!(fx.input_files(), vec![PLACEHOLDER_FILENAME.to_string()]);
    submit.assert_async().await;
}

#[tokio::test]
async fn template_without_tokens_left_after_rewrite() {
    let mut server = mockito::Server::new_async().await;
    let fx = Fixture::new(&server.url(), Variant::T2v);
    fx.write_output("wan_00002.mp4");

    let _ready = mock_ready(&mut server).await;
    let no_tokens = server
        .mock("POST", "/prompt")
        // Every token is `__NAME__`; the body must not contain a double underscore.
        .match_body(Matcher::Regex(r"^[^_]*(_[^_][^_]*)*$".to_string()))
        .with_status(200)
        .with_body(submit_ok())
        .expect(1)
        .create_async()
        .await;
    let _history = mock_history(&mut server, "wan_00002.mp4").await;

    let result = fx.handler().handle(&job(json!({"prompt": "a dog"}))).await.unwrap();

    assert!(!result.is_error(), "unexpected {result:?}");
    no_tokens.assert_async().await;
}

#[tokio::test]
async fn submit_failure_becomes_error_result() {
    let mut server = mockito::Server::new_async().await;
    let fx = Fixture::new(&server.url(), Variant::T2v);

    let _ready = mock_ready(&mut server).await;
    let _submit = server
        .mock("POST", "/prompt")
        .with_status(400)
        .with_body(r#"{"error": "invalid prompt"}"#)
        .create_async()
        .await;

    let result = fx.handler().handle(&job(json!({}))).await.unwrap();

    assert_matches!(result, JobResult::Error { error } if error.starts_with("Failed to submit prompt to ComfyUI:"));
}

#[tokio::test]
async fn history_without_prompt_times_out() {
    let mut server = mockito::Server::new_async().await;
    let fx = Fixture::new(&server.url(), Variant::T2v);

    let _ready = mock_ready(&mut server).await;
    let _submit = server
        .mock("POST", "/prompt")
        .with_status(200)
        .with_body(submit_ok())
        .create_async()
        .await;
    let _history = server
        .mock("GET", format!("/history/{PROMPT_ID}").as_str())
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let result = fx.handler().handle(&job(json!({"prompt": "a cat"}))).await.unwrap();

    assert_eq!(
        serde_json::to_value(&result).unwrap(),
        json!({"error": "Timed out waiting for output."})
    );
}

#[tokio::test]
async fn invalid_number_is_reported_without_submitting() {
    let mut server = mockito::Server::new_async().await;
    let fx = Fixture::new(&server.url(), Variant::T2v);

    let _ready = mock_ready(&mut server).await;
    let submit = server.mock("POST", "/prompt").expect(0).create_async().await;

    let result = fx.handler().handle(&job(json!({"steps": "many"}))).await.unwrap();

    assert_matches!(result, JobResult::Error { error } if error.contains("steps"));
    submit.assert_async().await;
}

#[tokio::test]
async fn broken_template_is_reported() {
    let mut server = mockito::Server::new_async().await;
    let fx = Fixture::new(&server.url(), Variant::T2v);
    std::fs::write(&fx.config.workflow_path, "{\"6\": ").unwrap();

    let _ready = mock_ready(&mut server).await;
    let submit = server.mock("POST", "/prompt").expect(0).create_async().await;

    let result = fx.handler().handle(&job(json!({}))).await.unwrap();

    assert_matches!(result, JobResult::Error { error } if error.contains("not valid JSON"));
    submit.assert_async().await;
}

// ---------------------------------------------------------------------------
// Text + image to video
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ti2v_job_without_image_is_rejected() {
    let mut server = mockito::Server::new_async().await;
    let fx = Fixture::new(&server.url(), Variant::Ti2v);

    let _ready = mock_ready(&mut server).await;
    let submit = server.mock("POST", "/prompt").expect(0).create_async().await;

    let result = fx
        .handler()
        .handle(&job(json!({"prompt": "a cat", "width": 512, "height": 512})))
        .await
        .unwrap();

    assert_matches!(result, JobResult::Error { error } if error.starts_with("An input image is required"));
    assert!(fx.input_files().is_empty());
    submit.assert_async().await;
}

#[tokio::test]
async fn ti2v_copies_local_image_and_keeps_embeds_node() {
    let mut server = mockito::Server::new_async().await;
    let fx = Fixture::new(&server.url(), Variant::Ti2v);
    fx.write_output("wan_00003.mp4");
    let source = fx.root().join("portrait.jpg");
    std::fs::write(&source, b"jpeg-bytes").unwrap();

    let _ready = mock_ready(&mut server).await;
    let submit = server
        .mock("POST", "/prompt")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#""image":"input_[0-9a-f]{32}\.jpg""#.to_string()),
            Matcher::PartialJson(json!({
                "prompt": {
                    "541": {"class_type": "WanVideoImageToVideoEncode", "inputs": {"width": 480, "height": 832, "vae": ["38", 0]}},
                    "122": {"inputs": {"attention_mode": "sdpa"}}
                }
            })),
        ]))
        .with_status(200)
        .with_body(submit_ok())
        .expect(1)
        .create_async()
        .await;
    let _history = mock_history(&mut server, "wan_00003.mp4").await;

    let result = fx
        .handler()
        .handle(&job(json!({"image_path": source.to_str().unwrap()})))
        .await
        .unwrap();

    assert!(!result.is_error(), "unexpected {result:?}");
    let files = fx.input_files();
    assert_eq!(files.len(), 1);
    assert_eq!(
        std::fs::read(fx.config.input_dir.join(&files[0])).unwrap(),
        b"jpeg-bytes"
    );
    submit.assert_async().await;
}

#[tokio::test]
async fn ti2v_decodes_data_url_image() {
    let mut server = mockito::Server::new_async().await;
    let fx = Fixture::new(&server.url(), Variant::Ti2v);
    fx.write_output("wan_00004.mp4");

    let _ready = mock_ready(&mut server).await;
    let _submit = server
        .mock("POST", "/prompt")
        .with_status(200)
        .with_body(submit_ok())
        .create_async()
        .await;
    let _history = mock_history(&mut server, "wan_00004.mp4").await;

    let payload = BASE64.encode(b"png-bytes");
    let result = fx
        .handler()
        .handle(&job(json!({"image_base64": format!("data:image/png;base64,{payload}")})))
        .await
        .unwrap();

    assert!(!result.is_error(), "unexpected {result:?}");
    let files = fx.input_files();
    assert_eq!(files.len(), 1);
    assert!(files[0].starts_with("input_") && files[0].ends_with(".png"));
    assert_eq!(
        std::fs::read(fx.config.input_dir.join(&files[0])).unwrap(),
        b"png-bytes"
    );
}

#[tokio::test]
async fn ti2v_rejects_data_url_without_payload() {
    let mut server = mockito::Server::new_async().await;
    let fx = Fixture::new(&server.url(), Variant::Ti2v);

    let _ready = mock_ready(&mut server).await;
    let submit = server.mock("POST", "/prompt").expect(0).create_async().await;

    let handler = fx.handler();
    let empty = handler
        .handle(&job(json!({"image_base64": "data:image/png;base64,"})))
        .await
        .unwrap();
    assert_eq!(empty, JobResult::error("Input image is empty"));

    let headless = handler
        .handle(&job(json!({"image_base64": "data:nothing"})))
        .await
        .unwrap();
    assert_matches!(headless, JobResult::Error { error } if error.starts_with("Invalid image data URL"));

    assert!(fx.input_files().is_empty());
    submit.assert_async().await;
}

#[tokio::test]
async fn extensionless_local_image_is_saved_as_png() {
    let mut server = mockito::Server::new_async().await;
    let fx = Fixture::new(&server.url(), Variant::Ti2v);
    fx.write_output("wan_00007.mp4");
    let source = fx.root().join("upload");
    std::fs::write(&source, b"raw-bytes").unwrap();

    let _ready = mock_ready(&mut server).await;
    let submit = server
        .mock("POST", "/prompt")
        .match_body(Matcher::Regex(r#""image":"input_[0-9a-f]{32}\.png""#.to_string()))
        .with_status(200)
        .with_body(submit_ok())
        .expect(1)
        .create_async()
        .await;
    let _history = mock_history(&mut server, "wan_00007.mp4").await;

    let result = fx
        .handler()
        .handle(&job(json!({"image_path": source.to_str().unwrap()})))
        .await
        .unwrap();

    assert!(!result.is_error(), "unexpected {result:?}");
    let files = fx.input_files();
    assert_eq!(files.len(), 1);
    let name = &files[0];
    assert!(name.starts_with("input_") && name.ends_with(".png"), "{name}");
    assert_eq!(name.len(), "input_".len() + 32 + ".png".len());
    assert!(name["input_".len()..name.len() - ".png".len()]
        .chars()
        .all(|c| c.is_ascii_hexdigit()));
    submit.assert_async().await;
}

#[tokio::test]
async fn missing_local_image_is_reported() {
    let mut server = mockito::Server::new_async().await;
    let fx = Fixture::new(&server.url(), Variant::Ti2v);
    let missing = fx.root().join("nowhere.png");

    let _ready = mock_ready(&mut server).await;
    let submit = server.mock("POST", "/prompt").expect(0).create_async().await;

    let result = fx
        .handler()
        .handle(&job(json!({"image_path": missing.to_str().unwrap()})))
        .await
        .unwrap();

    assert_matches!(result, JobResult::Error { error } if error.starts_with("Failed to copy input image"));
    assert!(fx.input_files().is_empty());
    submit.assert_async().await;
}

#[tokio::test]
async fn ti2v_downloads_image_url() {
    let mut server = mockito::Server::new_async().await;
    let fx = Fixture::new(&server.url(), Variant::Ti2v);
    fx.write_output("wan_00005.mp4");

    let _ready = mock_ready(&mut server).await;
    let download = server
        .mock("GET", "/assets/start.png")
        .with_status(200)
        .with_body(b"remote-png".as_slice())
        .expect(1)
        .create_async()
        .await;
    let _submit = server
        .mock("POST", "/prompt")
        .with_status(200)
        .with_body(submit_ok())
        .create_async()
        .await;
    let _history = mock_history(&mut server, "wan_00005.mp4").await;

    let url = format!("{}/assets/start.png", server.url());
    let result = fx.handler().handle(&job(json!({"image_url": url}))).await.unwrap();

    assert!(!result.is_error(), "unexpected {result:?}");
    let files = fx.input_files();
    assert_eq!(files.len(), 1);
    assert_eq!(
        std::fs::read(fx.config.input_dir.join(&files[0])).unwrap(),
        b"remote-png"
    );
    download.assert_async().await;
}

#[tokio::test]
async fn failed_image_download_is_reported() {
    let mut server = mockito::Server::new_async().await;
    let fx = Fixture::new(&server.url(), Variant::Ti2v);

    let _ready = mock_ready(&mut server).await;
    let _missing = server
        .mock("GET", "/assets/gone.png")
        .with_status(404)
        .create_async()
        .await;
    let submit = server.mock("POST", "/prompt").expect(0).create_async().await;

    let url = format!("{}/assets/gone.png", server.url());
    let result = fx.handler().handle(&job(json!({"image_url": url}))).await.unwrap();

    assert_eq!(result, JobResult::error("Input image download returned HTTP 404"));
    submit.assert_async().await;
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_mode_skips_comfyui_entirely() {
    let server = mockito::Server::new_async().await;
    let fx = Fixture::new(&server.url(), Variant::Ti2v);

    // No mocks: any request would fail readiness.
    let result = fx.handler().handle(&job(json!({"test_mode": true}))).await.unwrap();

    assert_eq!(serde_json::to_value(&result).unwrap(), json!({"status": "ok"}));
    assert!(fx.input_files().is_empty());
}

#[tokio::test]
async fn unreachable_comfyui_is_fatal() {
    let server = mockito::Server::new_async().await;
    let fx = Fixture::new(&server.url(), Variant::T2v);

    let err = fx.handler().handle(&job(json!({"prompt": "a cat"}))).await.unwrap_err();

    assert_matches!(err, HandlerError::ServiceUnavailable(e) if e.timeout == Duration::from_millis(200));
}

#[tokio::test]
async fn placeholder_is_reused_across_jobs() {
    let mut server = mockito::Server::new_async().await;
    let fx = Fixture::new(&server.url(), Variant::T2v);
    fx.write_output("wan_00006.mp4");

    let _ready = mock_ready(&mut server).await;
    let _submit = server
        .mock("POST", "/prompt")
        .with_status(200)
        .with_body(submit_ok())
        .expect(2)
        .create_async()
        .await;
    let _history = mock_history(&mut server, "wan_00006.mp4").await;

    let handler = fx.handler();
    for _ in 0..2 {
        let result = handler.handle(&job(json!({}))).await.unwrap();
        assert!(!result.is_error(), "unexpected {result:?}");
    }
    assert_eq!(fx.input_files(), vec![PLACEHOLDER_FILENAME.to_string()]);
}
