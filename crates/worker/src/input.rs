//! Input image materialization.
//!
//! ComfyUI's `LoadImage` node reads files by name from its input
//! directory, so every job image (local path, URL or inline base64) is
//! written there under a fresh random name. Jobs that may run without an
//! image get a shared 1x1 placeholder instead.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::alphabet;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::engine::{GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use uuid::Uuid;

use wanvid_core::job::{ImageSource, JobInput};

/// File name of the shared placeholder image.
pub const PLACEHOLDER_FILENAME: &str = "placeholder_1x1.png";

/// A 1x1 transparent PNG.
const PLACEHOLDER_PNG_BASE64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR4nGNgYAAAAAMAASsJTYQAAAAASUVORK5CYII=";

/// Timeout for downloading an `image_url`.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Decoder for job-supplied data. Padding is still required, but stray bits
/// in the final symbol are ignored.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

/// Extension used when the source does not provide one.
const DEFAULT_EXTENSION: &str = ".png";

/// Errors while placing the job image into the input directory.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("An input image is required: provide image_path, image_url or image_base64")]
    Required,

    #[error("Failed to copy input image {}: {source}", .path.display())]
    Copy {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to download input image: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("Input image download returned HTTP {status}")]
    Status { status: u16 },

    #[error("Invalid base64 image data: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Invalid image data URL: missing ',' after the header")]
    MalformedDataUrl,

    #[error("Input image is empty")]
    Empty,

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Writes job images into ComfyUI's input directory.
#[derive(Debug, Clone)]
pub struct InputMaterializer {
    input_dir: PathBuf,
    client: reqwest::Client,
}

impl InputMaterializer {
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Resolve the job's image to a file name inside the input directory.
    ///
    /// Without an image, a required image is an error and an optional one
    /// falls back to the placeholder.
    pub async fn resolve(&self, input: &JobInput, required: bool) -> Result<String, InputError> {
        if let Some(name) = self.save(input).await? {
            return Ok(name);
        }
        if required {
            return Err(InputError::Required);
        }
        tracing::debug!("No input image supplied, using placeholder");
        self.ensure_placeholder().await
    }

    /// Save the job's image, if it has one, and return its file name.
    pub async fn save(&self, input: &JobInput) -> Result<Option<String>, InputError> {
        let Some(source) = input.image_source() else {
            return Ok(None);
        };
        self.create_dir().await?;

        let name = match &source {
            ImageSource::Path(src) => self.copy_local(src).await?,
            ImageSource::Url(url) => {
                let bytes = self.fetch(url).await?;
                self.write_random(&bytes).await?
            }
            ImageSource::Base64(raw) => {
                let bytes = decode_base64_image(raw)?;
                self.write_random(&bytes).await?
            }
        };

        tracing::info!(filename = %name, source = source_kind(&source), "Input image saved");
        Ok(Some(name))
    }

    /// Create the placeholder image once and return its file name.
    ///
    /// Content is fixed, so a concurrent re-creation is harmless.
    pub async fn ensure_placeholder(&self) -> Result<String, InputError> {
        self.create_dir().await?;
        let path = self.input_dir.join(PLACEHOLDER_FILENAME);

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let bytes = BASE64.decode(PLACEHOLDER_PNG_BASE64)?;
            tokio::fs::write(&path, bytes)
                .await
                .map_err(|source| InputError::Write {
                    path: path.clone(),
                    source,
                })?;
            tracing::info!(path = %path.display(), "Created placeholder input image");
        }

        Ok(PLACEHOLDER_FILENAME.to_string())
    }

    // ---- private helpers ----

    async fn create_dir(&self) -> Result<(), InputError> {
        tokio::fs::create_dir_all(&self.input_dir)
            .await
            .map_err(|source| InputError::Write {
                path: self.input_dir.clone(),
                source,
            })
    }

    async fn copy_local(&self, src: &Path) -> Result<String, InputError> {
        let ext = src
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .map_or_else(|| DEFAULT_EXTENSION.to_string(), |e| format!(".{e}"));
        let name = random_name(&ext);

        tokio::fs::copy(src, self.input_dir.join(&name))
            .await
            .map_err(|source| InputError::Copy {
                path: src.to_path_buf(),
                source,
            })?;
        Ok(name)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, InputError> {
        let response = self.client.get(url).timeout(FETCH_TIMEOUT).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(InputError::Status {
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(InputError::Empty);
        }
        Ok(bytes.to_vec())
    }

    async fn write_random(&self, bytes: &[u8]) -> Result<String, InputError> {
        let name = random_name(DEFAULT_EXTENSION);
        let path = self.input_dir.join(&name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| InputError::Write { path, source })?;
        Ok(name)
    }
}

/// Decode inline image data, dropping a `data:<mime>;base64,` header and
/// any embedded whitespace first. Data that decodes to nothing is rejected.
pub fn decode_base64_image(raw: &str) -> Result<Vec<u8>, InputError> {
    let payload = strip_data_url_header(raw).ok_or(InputError::MalformedDataUrl)?;
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = LENIENT_BASE64.decode(compact)?;
    if bytes.is_empty() {
        return Err(InputError::Empty);
    }
    Ok(bytes)
}

/// Everything after the first comma of a `data:` URL, or `None` when the
/// header has no comma. Other input is returned unchanged.
pub fn strip_data_url_header(raw: &str) -> Option<&str> {
    if raw.starts_with("data:") {
        raw.split_once(',').map(|(_, payload)| payload)
    } else {
        Some(raw)
    }
}

fn random_name(ext: &str) -> String {
    format!("input_{}{ext}", Uuid::new_v4().simple())
}

fn source_kind(source: &ImageSource) -> &'static str {
    match source {
        ImageSource::Path(_) => "path",
        ImageSource::Url(_) => "url",
        ImageSource::Base64(_) => "base64",
    }
}
