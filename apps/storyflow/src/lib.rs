//! # Storyflow
//!
//! The service shell around `storyflow-core`: HTTP API, CLI, configuration
//! and the generator backends that talk to OpenAI-compatible endpoints.

pub mod api;
pub mod cli;
pub mod config;
pub mod generation;
