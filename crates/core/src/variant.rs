//! Endpoint variants and the workflow patches each one needs.

use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Node ids whose `attention_mode` input is forced to a portable backend.
pub const ATTENTION_NODE_IDS: &[&str] = &["122", "549"];

/// Node id of the image-conditioned embeds node in the Wan 2.2 template.
pub const EMBEDS_NODE_ID: &str = "541";

/// Which endpoint flavour this worker serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Variant {
    /// Text-to-video: the input image is optional.
    #[default]
    T2v,
    /// Text+image-to-video: an input image is mandatory.
    Ti2v,
}

/// Static per-variant behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantProfile {
    /// Fail the job when no input image is supplied.
    pub image_required: bool,
    /// Node to switch to text-only empty embeds, if any.
    pub embeds_switch_node: Option<&'static str>,
    /// Nodes that get the attention backend override.
    pub attention_nodes: &'static [&'static str],
}

impl Variant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::T2v => "t2v",
            Self::Ti2v => "ti2v",
        }
    }

    pub fn profile(self) -> VariantProfile {
        match self {
            Self::T2v => VariantProfile {
                image_required: false,
                embeds_switch_node: Some(EMBEDS_NODE_ID),
                attention_nodes: ATTENTION_NODE_IDS,
            },
            Self::Ti2v => VariantProfile {
                image_required: true,
                embeds_switch_node: None,
                attention_nodes: ATTENTION_NODE_IDS,
            },
        }
    }
}

impl FromStr for Variant {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "t2v" => Ok(Self::T2v),
            "ti2v" => Ok(Self::Ti2v),
            other => Err(CoreError::Validation(format!(
                "Unknown workflow variant '{other}'. Must be one of: t2v, ti2v"
            ))),
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
