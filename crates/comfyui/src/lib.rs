//! ComfyUI REST client and job orchestration.
//!
//! Provides the HTTP API wrapper, typed history records, a
//! deadline-bounded polling primitive, and [`runner::WorkflowRunner`],
//! which drives a workflow from submission to an encoded output file.

pub mod api;
pub mod history;
pub mod poll;
pub mod runner;
