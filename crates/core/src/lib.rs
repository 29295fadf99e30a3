//! Pure job-processing logic for the Wan video worker.
//!
//! Turns a raw job document into a concrete ComfyUI workflow: input
//! coercion, token mapping, template rewriting, and the structural node
//! patches each [`variant::Variant`] needs. Nothing here touches the
//! network or the filesystem.

pub mod adapter;
pub mod error;
pub mod job;
pub mod template;
pub mod tokens;
pub mod variant;
