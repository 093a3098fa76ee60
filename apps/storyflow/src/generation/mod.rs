//! # Generation Module
//!
//! Generator backends and the orchestrator that runs a generation against
//! a stage.
//!
//! A [`Generator`] turns a rendered prompt into text, either in one piece or
//! as a stream of chunks. Backends are chosen per settings row by a
//! [`GeneratorFactory`]; both providers speak the OpenAI-compatible
//! chat-completions protocol today, so [`HttpGeneratorFactory`] builds an
//! [`OpenAiGenerator`] for each.

pub mod openai;
pub mod orchestrator;

pub use openai::{OpenAiGenerator, SseLine, parse_sse_line};
pub use orchestrator::{
    EventStream, GenerateRequest, GenerationOutcome, Orchestrator, StreamEvent,
};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use storyflow_core::{AiSettings, GenerationParams, Provider, SecretBox, StoryflowError};

/// Text chunks as they arrive from the backend.
pub type TokenStream = BoxStream<'static, Result<String, StoryflowError>>;

// =============================================================================
// GENERATOR CONTRACT
// =============================================================================

/// Outcome of a connection test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionCheck {
    pub success: bool,
    pub message: String,
    pub model: Option<String>,
}

impl ConnectionCheck {
    pub fn ok(model: impl Into<String>) -> Self {
        Self {
            success: true,
            message: "Connection successful".to_string(),
            model: Some(model.into()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            model: None,
        }
    }
}

/// A text generation backend.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate the whole completion.
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, StoryflowError>;

    /// Start a streamed completion.
    ///
    /// Errors before the first chunk are returned directly; later failures
    /// arrive as an `Err` item and end the stream.
    async fn stream_generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<TokenStream, StoryflowError>;

    /// Check that the endpoint is reachable with the configured key.
    async fn test_connection(&self) -> ConnectionCheck;
}

/// Builds the generator a settings row describes.
pub trait GeneratorFactory: Send + Sync {
    fn create(
        &self,
        settings: &AiSettings,
        secrets: &SecretBox,
    ) -> Result<Box<dyn Generator>, StoryflowError>;
}

// =============================================================================
// HTTP FACTORY
// =============================================================================

/// Factory for network backends. Shares one connection pool.
#[derive(Debug, Clone)]
pub struct HttpGeneratorFactory {
    client: reqwest::Client,
}

impl HttpGeneratorFactory {
    /// `timeout` bounds connecting and each read from the upstream.
    ///
    /// It is not a total deadline: a stream that keeps delivering tokens
    /// runs for as long as it needs.
    pub fn new(timeout: Duration) -> Result<Self, StoryflowError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| {
                StoryflowError::ConfigurationError(format!("Cannot build HTTP client: {}", e))
            })?;
        Ok(Self { client })
    }
}

impl GeneratorFactory for HttpGeneratorFactory {
    fn create(
        &self,
        settings: &AiSettings,
        secrets: &SecretBox,
    ) -> Result<Box<dyn Generator>, StoryflowError> {
        let api_key = settings.decrypt_api_key(secrets)?;
        match settings.provider {
            Provider::OpenAi | Provider::Custom => Ok(Box::new(OpenAiGenerator::new(
                self.client.clone(),
                &settings.base_url,
                &settings.model,
                api_key,
            ))),
        }
    }
}
