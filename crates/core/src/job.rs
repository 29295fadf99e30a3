//! Job input parsing and numeric coercion.
//!
//! A job arrives as an untyped JSON document shaped `{"input": {...}}`.
//! [`JobInput`] wraps the inner mapping and exposes the handful of keys the
//! worker understands; unknown keys are ignored. [`GenerationParams`] is the
//! fully defaulted, typed view used to build the token mapping.

use std::path::PathBuf;

use serde_json::{Map, Value};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default output width in pixels.
pub const DEFAULT_WIDTH: i64 = 480;

/// Default output height in pixels.
pub const DEFAULT_HEIGHT: i64 = 832;

/// Default clip length in frames.
pub const DEFAULT_LENGTH: i64 = 81;

/// Default sampler step count.
pub const DEFAULT_STEPS: i64 = 10;

/// Default classifier-free guidance scale.
pub const DEFAULT_CFG: f64 = 2.0;

/// Default sampler seed.
pub const DEFAULT_SEED: i64 = 42;

/// Default sampler scheduler name.
pub const DEFAULT_SCHEDULER: &str = "dpm++_sde";

/// Default overlap between context windows, in frames.
pub const DEFAULT_CONTEXT_OVERLAP: i64 = 48;

/// Upper bound for the default context window size.
pub const MAX_DEFAULT_CONTEXT_FRAMES: i64 = 81;

/// Number of LoRA slots the workflow templates expose.
pub const LORA_SLOTS: usize = 4;

/// Sentinel LoRA name meaning "slot unused".
pub const NO_LORA: &str = "none";

/// Blend weight for an unset LoRA.
pub const DEFAULT_LORA_WEIGHT: f64 = 1.0;

// ---------------------------------------------------------------------------
// Raw input
// ---------------------------------------------------------------------------

/// Where the job's conditioning image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// A file already on the worker's filesystem.
    Path(PathBuf),
    /// A remote URL to download.
    Url(String),
    /// Inline base64 data, optionally carrying a `data:...;base64,` header.
    Base64(String),
}

/// The `input` mapping of a single job.
#[derive(Debug, Clone, Default)]
pub struct JobInput {
    params: Map<String, Value>,
}

impl JobInput {
    pub fn new(params: Map<String, Value>) -> Self {
        Self { params }
    }

    /// Extract the `input` mapping from a job envelope.
    ///
    /// A missing or non-object `input` yields an empty mapping.
    pub fn from_job(job: &Value) -> Self {
        match job.get("input") {
            Some(Value::Object(params)) => Self::new(params.clone()),
            _ => Self::default(),
        }
    }

    /// Look up a key, treating JSON `null` as absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key).filter(|v| !v.is_null())
    }

    /// Whether the caller asked for the health-check short-circuit.
    pub fn is_test_mode(&self) -> bool {
        self.get("test_mode").is_some_and(is_truthy)
    }

    /// Resolve the image reference, preferring path, then URL, then base64.
    pub fn image_source(&self) -> Option<ImageSource> {
        if let Some(path) = self.non_empty_str("image_path") {
            return Some(ImageSource::Path(PathBuf::from(path)));
        }
        if let Some(url) = self.non_empty_str("image_url") {
            return Some(ImageSource::Url(url.to_string()));
        }
        self.non_empty_str("image_base64")
            .map(|data| ImageSource::Base64(data.to_string()))
    }

    /// Read a text parameter, rendering non-string scalars as JSON text.
    pub fn text(&self, key: &str, default: &str) -> String {
        match self.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => default.to_string(),
        }
    }

    /// Read an integer parameter, coercing numbers and numeric strings.
    pub fn int(&self, key: &str, default: i64) -> Result<i64, CoreError> {
        self.get(key)
            .map_or(Ok(default), |value| coerce_int(key, value))
    }

    /// Read a floating-point parameter, coercing numbers and numeric strings.
    pub fn float(&self, key: &str, default: f64) -> Result<f64, CoreError> {
        self.get(key)
            .map_or(Ok(default), |value| coerce_float(key, value))
    }

    /// Parse `lora_pairs` into exactly [`LORA_SLOTS`] entries.
    ///
    /// Entries past the last slot are dropped; missing slots and `null`
    /// entries take [`LoraPair::default`].
    pub fn lora_pairs(&self) -> Result<[LoraPair; LORA_SLOTS], CoreError> {
        let mut slots: [LoraPair; LORA_SLOTS] = Default::default();

        let pairs = match self.get("lora_pairs") {
            None => return Ok(slots),
            Some(Value::Array(pairs)) => pairs,
            Some(other) => {
                return Err(CoreError::Validation(format!(
                    "'lora_pairs' must be a list (got {other})"
                )))
            }
        };

        for (idx, entry) in pairs.iter().take(LORA_SLOTS).enumerate() {
            slots[idx] = match entry {
                Value::Null => LoraPair::default(),
                Value::Object(record) => LoraPair::from_record(idx, record)?,
                other => {
                    return Err(CoreError::Validation(format!(
                        "lora_pairs[{idx}] must be an object (got {other})"
                    )))
                }
            };
        }

        Ok(slots)
    }

    fn non_empty_str(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

// ---------------------------------------------------------------------------
// LoRA pairs
// ---------------------------------------------------------------------------

/// A high-noise/low-noise LoRA pair with its blend weights.
#[derive(Debug, Clone, PartialEq)]
pub struct LoraPair {
    pub high: String,
    pub low: String,
    pub high_weight: f64,
    pub low_weight: f64,
}

impl Default for LoraPair {
    fn default() -> Self {
        Self {
            high: NO_LORA.to_string(),
            low: NO_LORA.to_string(),
            high_weight: DEFAULT_LORA_WEIGHT,
            low_weight: DEFAULT_LORA_WEIGHT,
        }
    }
}

impl LoraPair {
    fn from_record(idx: usize, record: &Map<String, Value>) -> Result<Self, CoreError> {
        let weight = |key: &str| -> Result<f64, CoreError> {
            match record.get(key) {
                None | Some(Value::Null) => Ok(DEFAULT_LORA_WEIGHT),
                Some(value) => coerce_float(&format!("lora_pairs[{idx}].{key}"), value),
            }
        };

        Ok(Self {
            high: lora_name(record.get("high")),
            low: lora_name(record.get("low")),
            high_weight: weight("high_weight")?,
            low_weight: weight("low_weight")?,
        })
    }
}

/// Empty or missing names map to [`NO_LORA`].
fn lora_name(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(v) if is_truthy(v) => v.to_string(),
        _ => NO_LORA.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Generation parameters
// ---------------------------------------------------------------------------

/// Every sampling parameter of a job, with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub prompt: String,
    pub negative_prompt: String,
    pub width: i64,
    pub height: i64,
    pub length: i64,
    pub steps: i64,
    pub cfg: f64,
    pub seed: i64,
    pub scheduler: String,
    pub context_overlap: i64,
    pub context_frames: i64,
    pub loras: [LoraPair; LORA_SLOTS],
}

impl GenerationParams {
    /// Apply defaults and coerce every numeric field.
    ///
    /// `context_frames` defaults to `min(length, 81)` using the already
    /// resolved `length`.
    pub fn from_input(input: &JobInput) -> Result<Self, CoreError> {
        let length = input.int("length", DEFAULT_LENGTH)?;

        Ok(Self {
            prompt: input.text("prompt", ""),
            negative_prompt: input.text("negative_prompt", ""),
            width: input.int("width", DEFAULT_WIDTH)?,
            height: input.int("height", DEFAULT_HEIGHT)?,
            length,
            steps: input.int("steps", DEFAULT_STEPS)?,
            cfg: input.float("cfg", DEFAULT_CFG)?,
            seed: input.int("seed", DEFAULT_SEED)?,
            scheduler: input.text("scheduler", DEFAULT_SCHEDULER),
            context_overlap: input.int("context_overlap", DEFAULT_CONTEXT_OVERLAP)?,
            context_frames: input
                .int("context_frames", length.min(MAX_DEFAULT_CONTEXT_FRAMES))?,
            loras: input.lora_pairs()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Coercion helpers
// ---------------------------------------------------------------------------

/// Loose truthiness: `false`, `0`, `""`, `[]`, `{}` and `null` are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Coerce a JSON value into an integer.
///
/// Floats are truncated toward zero; strings must parse as an integer
/// after trimming whitespace.
pub fn coerce_int(key: &str, value: &Value) -> Result<i64, CoreError> {
    let coerced = match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(i),
            None if n.is_f64() => n
                .as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| f.trunc() as i64),
            None => None,
        },
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    };

    coerced.ok_or_else(|| CoreError::Validation(format!("'{key}' must be an integer (got {value})")))
}

/// Coerce a JSON value into a finite float.
pub fn coerce_float(key: &str, value: &Value) -> Result<f64, CoreError> {
    let coerced = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };

    coerced
        .filter(|f| f.is_finite())
        .ok_or_else(|| CoreError::Validation(format!("'{key}' must be a number (got {value})")))
}
