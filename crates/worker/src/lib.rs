//! Wan video job worker.
//!
//! Loads its [`config::WorkerConfig`] from the environment, places the
//! job's image where ComfyUI can read it ([`input`]), and runs the job
//! end to end through [`handler::JobHandler`].

pub mod config;
pub mod handler;
pub mod input;
