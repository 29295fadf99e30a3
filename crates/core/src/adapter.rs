//! Structural patches applied to a rewritten workflow.
//!
//! These run after token substitution, on the concrete document that is
//! about to be submitted. Missing nodes are skipped silently: a template
//! that does not contain a patched node simply does not need the patch.

use serde_json::{Map, Value};

use crate::tokens::{self, TokenMap};
use crate::variant::VariantProfile;

/// Input key selecting the attention implementation.
pub const ATTENTION_MODE_INPUT: &str = "attention_mode";

/// Attention backend that runs on every supported GPU generation.
pub const PORTABLE_ATTENTION_MODE: &str = "sdpa";

/// Class type of the text-only embeds node.
pub const EMPTY_EMBEDS_CLASS: &str = "WanVideoEmptyEmbeds";

/// Frame-count input names that must agree after the switch.
const FRAME_INPUTS: &[&str] = &["num_frames", "video_frames", "empty_latent_video_frames"];

/// Inputs only meaningful for image-conditioned embeds.
const IMAGE_ONLY_INPUTS: &[&str] = &["start_image", "image", "vae", "clip_embeds"];

/// Fallback values for inputs the embeds node may omit.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbedDefaults {
    pub num_frames: Value,
    pub width: Value,
    pub height: Value,
}

impl EmbedDefaults {
    /// Take the job's resolved length and dimensions from the mapping.
    pub fn from_tokens(map: &TokenMap) -> Self {
        let value = |token: &str| map.get(token).cloned().unwrap_or(Value::Null);
        Self {
            num_frames: value(tokens::LENGTH),
            width: value(tokens::WIDTH),
            height: value(tokens::HEIGHT),
        }
    }
}

/// What [`adapt`] changed, for the caller to log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdaptReport {
    /// Nodes whose attention backend was overridden.
    pub attention_patched: Vec<String>,
    /// Node switched to empty embeds, if the switch applied.
    pub embeds_switched: Option<String>,
}

/// Apply every patch the variant calls for.
pub fn adapt(workflow: &mut Value, profile: &VariantProfile, map: &TokenMap) -> AdaptReport {
    let attention_patched =
        force_attention_mode(workflow, profile.attention_nodes, PORTABLE_ATTENTION_MODE);

    let embeds_switched = profile.embeds_switch_node.filter(|node_id| {
        switch_to_empty_embeds(workflow, node_id, &EmbedDefaults::from_tokens(map))
    });

    AdaptReport {
        attention_patched,
        embeds_switched: embeds_switched.map(str::to_string),
    }
}

/// Override `attention_mode` on the listed nodes that declare it.
///
/// Returns the ids of the nodes that were patched.
pub fn force_attention_mode(workflow: &mut Value, node_ids: &[&str], mode: &str) -> Vec<String> {
    let mut patched = Vec::new();

    for &node_id in node_ids {
        let Some(inputs) = workflow
            .get_mut(node_id)
            .and_then(|node| node.get_mut("inputs"))
            .and_then(Value::as_object_mut)
        else {
            continue;
        };

        if let Some(current) = inputs.get_mut(ATTENTION_MODE_INPUT) {
            *current = Value::String(mode.to_string());
            patched.push(node_id.to_string());
        }
    }

    patched
}

/// Turn an image-conditioned embeds node into [`EMPTY_EMBEDS_CLASS`].
///
/// Unifies the frame-count inputs to one value, renames `width`/`height`
/// to `empty_latent_width`/`empty_latent_height`, and drops inputs that
/// reference the image path. Values the node omits come from `defaults`.
///
/// Returns `false` when the node is absent or not an object.
pub fn switch_to_empty_embeds(workflow: &mut Value, node_id: &str, defaults: &EmbedDefaults) -> bool {
    let Some(node) = workflow.get_mut(node_id).and_then(Value::as_object_mut) else {
        return false;
    };

    node.insert("class_type".to_string(), Value::String(EMPTY_EMBEDS_CLASS.to_string()));

    let inputs = node
        .entry("inputs")
        .or_insert_with(|| Value::Object(Map::new()));
    if !inputs.is_object() {
        *inputs = Value::Object(Map::new());
    }
    let Some(inputs) = inputs.as_object_mut() else {
        return false;
    };

    let frames = inputs
        .get("num_frames")
        .or_else(|| inputs.get("video_frames"))
        .cloned()
        .unwrap_or_else(|| defaults.num_frames.clone());
    for &key in FRAME_INPUTS {
        inputs.insert(key.to_string(), frames.clone());
    }

    let width = inputs.shift_remove("width").unwrap_or_else(|| defaults.width.clone());
    let height = inputs.shift_remove("height").unwrap_or_else(|| defaults.height.clone());
    inputs.insert("empty_latent_width".to_string(), width);
    inputs.insert("empty_latent_height".to_string(), height);

    for &key in IMAGE_ONLY_INPUTS {
        inputs.shift_remove(key);
    }

    true
}
