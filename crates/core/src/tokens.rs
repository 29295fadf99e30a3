//! Placeholder tokens and the per-job token mapping.
//!
//! Workflow templates carry `__NAME__` placeholders in their string
//! inputs. [`build_mapping`] resolves a job's [`GenerationParams`] into a
//! [`TokenMap`] from each placeholder to its concrete value.

use serde_json::Value;

use crate::job::{GenerationParams, LORA_SLOTS};

// ---------------------------------------------------------------------------
// Token vocabulary
// ---------------------------------------------------------------------------

pub const PROMPT: &str = "__PROMPT__";
pub const NEGATIVE: &str = "__NEGATIVE__";
pub const IMAGE_FILENAME: &str = "__IMAGE_FILENAME__";
pub const WIDTH: &str = "__WIDTH__";
pub const HEIGHT: &str = "__HEIGHT__";
pub const LENGTH: &str = "__LENGTH__";
pub const STEPS: &str = "__STEPS__";
pub const CFG: &str = "__CFG__";
pub const SEED: &str = "__SEED__";
pub const SCHEDULER: &str = "__SCHEDULER__";
pub const CONTEXT_FRAMES: &str = "__CONTEXT_FRAMES__";
pub const CONTEXT_OVERLAP: &str = "__CONTEXT_OVERLAP__";

/// LoRA name token for a zero-based slot, e.g. `__LORA1_HIGH__`.
pub fn lora_high(slot: usize) -> String {
    format!("__LORA{}_HIGH__", slot + 1)
}

pub fn lora_low(slot: usize) -> String {
    format!("__LORA{}_LOW__", slot + 1)
}

pub fn lora_high_weight(slot: usize) -> String {
    format!("__LORA{}_HIGH_WEIGHT__", slot + 1)
}

pub fn lora_low_weight(slot: usize) -> String {
    format!("__LORA{}_LOW_WEIGHT__", slot + 1)
}

// ---------------------------------------------------------------------------
// TokenMap
// ---------------------------------------------------------------------------

/// Ordered mapping from placeholder token to substitution value.
///
/// Insertion order is preserved and re-inserting a token replaces its
/// value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenMap {
    entries: Vec<(String, Value)>,
}

impl TokenMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, token: impl Into<String>, value: impl Into<Value>) {
        let token = token.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(t, _)| *t == token) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((token, value)),
        }
    }

    pub fn get(&self, token: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(t, _)| t == token)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(t, v)| (t.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for TokenMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (token, value) in iter {
            map.insert(token, value);
        }
        map
    }
}

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

/// Build the token mapping for one job.
///
/// `image_filename` is the name of the materialized input image inside
/// the service's input directory; `None` maps to an empty string.
pub fn build_mapping(params: &GenerationParams, image_filename: Option<&str>) -> TokenMap {
    let mut map = TokenMap::new();

    map.insert(PROMPT, params.prompt.as_str());
    map.insert(NEGATIVE, params.negative_prompt.as_str());
    map.insert(IMAGE_FILENAME, image_filename.unwrap_or_default());
    map.insert(WIDTH, params.width);
    map.insert(HEIGHT, params.height);
    map.insert(LENGTH, params.length);
    map.insert(STEPS, params.steps);
    map.insert(CFG, params.cfg);
    map.insert(SEED, params.seed);
    map.insert(SCHEDULER, params.scheduler.as_str());
    map.insert(CONTEXT_FRAMES, params.context_frames);
    map.insert(CONTEXT_OVERLAP, params.context_overlap);

    for (slot, pair) in params.loras.iter().enumerate().take(LORA_SLOTS) {
        map.insert(lora_high(slot), pair.high.as_str());
        map.insert(lora_low(slot), pair.low.as_str());
        map.insert(lora_high_weight(slot), pair.high_weight);
        map.insert(lora_low_weight(slot), pair.low_weight);
    }

    map
}
