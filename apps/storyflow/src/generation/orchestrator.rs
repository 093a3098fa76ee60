//! # Generation Orchestrator
//!
//! Runs one generation against a stage:
//!
//! 1. under the store lock: load the project, resolve settings, pick the
//!    template (custom prompt, else the stored system prompt)
//! 2. without the lock: render the prompt and call the generator
//! 3. under the lock again: persist through `Store::record_generation`
//!
//! Streaming persists exactly once, after the upstream stream ends on its
//! own. A consumer that stops polling leaves the stage untouched.

use super::{Generator, GeneratorFactory, TokenStream};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storyflow_core::primitives::MAX_PROMPT_LENGTH;
use storyflow_core::{
    GenerationParams, GenerationRecord, ProjectId, SecretBox, SettingsId, Stage, StageType,
    StageVersion, Store, StoryflowError, assemble, render,
};
use tokio::sync::Mutex;

// =============================================================================
// REQUEST / OUTCOME
// =============================================================================

/// A request to generate one stage's content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub project_id: ProjectId,
    pub stage_type: StageType,
    /// Settings to use; the default settings when absent.
    #[serde(default)]
    pub settings_id: Option<SettingsId>,
    /// Replaces the stored system prompt for this request only.
    #[serde(default)]
    pub custom_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl GenerateRequest {
    pub fn new(project_id: ProjectId, stage_type: StageType) -> Self {
        Self {
            project_id,
            stage_type,
            settings_id: None,
            custom_prompt: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn validate(&self) -> Result<(), StoryflowError> {
        if let Some(prompt) = &self.custom_prompt {
            let len = prompt.chars().count();
            if len > MAX_PROMPT_LENGTH {
                return Err(StoryflowError::ValidationError(format!(
                    "custom prompt length {} exceeds maximum {} characters",
                    len, MAX_PROMPT_LENGTH
                )));
            }
        }
        GenerationParams::validate_overrides(self.temperature, self.max_tokens)
    }

    fn custom_template(&self) -> Option<&str> {
        self.custom_prompt
            .as_deref()
            .filter(|prompt| !prompt.trim().is_empty())
    }
}

/// A persisted generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOutcome {
    pub stage: Stage,
    pub version: StageVersion,
}

/// Items of a streamed generation.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Token(String),
    /// Emitted once, after the content was persisted.
    Done(Box<GenerationOutcome>),
}

pub type EventStream = BoxStream<'static, Result<StreamEvent, StoryflowError>>;

struct Prepared {
    prompt: String,
    params: GenerationParams,
    generator: Box<dyn Generator>,
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

/// Coordinates the store, the secrets and the generator backends.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<Mutex<Store>>,
    secrets: SecretBox,
    factory: Arc<dyn GeneratorFactory>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<Mutex<Store>>,
        secrets: SecretBox,
        factory: Arc<dyn GeneratorFactory>,
    ) -> Self {
        Self {
            store,
            secrets,
            factory,
        }
    }

    async fn prepare(&self, request: &GenerateRequest) -> Result<Prepared, StoryflowError> {
        request.validate()?;

        let (project, settings, template) = {
            let store = self.store.lock().await;
            let project = store.get_project(request.project_id)?;
            let settings = store.resolve_settings(request.settings_id)?;
            let template = match request.custom_template() {
                Some(custom) => custom.to_string(),
                None => store.get_prompt(request.stage_type)?.content,
            };
            (project, settings, template)
        };

        let prompt = render(&template, &assemble(&project));
        let params = settings
            .base_params()
            .with_overrides(request.temperature, request.max_tokens);
        let generator = self.factory.create(&settings, &self.secrets)?;

        tracing::info!(
            project_id = %request.project_id,
            stage = %request.stage_type,
            settings_id = %settings.id,
            model = %params.model,
            "Starting generation"
        );
        Ok(Prepared {
            prompt,
            params,
            generator,
        })
    }

    async fn persist(
        &self,
        project_id: ProjectId,
        stage_type: StageType,
        params: &GenerationParams,
        content: String,
    ) -> Result<GenerationOutcome, StoryflowError> {
        if content.is_empty() {
            return Err(StoryflowError::upstream(
                None,
                "generator returned empty content",
            ));
        }
        let record = GenerationRecord {
            content,
            model: params.model.clone(),
            params: params.to_metadata(),
        };
        let (stage, version) = self
            .store
            .lock()
            .await
            .record_generation(project_id, stage_type, &record)?;

        tracing::info!(
            project_id = %project_id,
            stage = %stage_type,
            version = version.version_number,
            chars = record.content.chars().count(),
            "Generation persisted"
        );
        Ok(GenerationOutcome { stage, version })
    }

    /// Generate in one piece and persist.
    pub async fn generate(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerationOutcome, StoryflowError> {
        let prepared = self.prepare(request).await?;
        let content = prepared
            .generator
            .generate(&prepared.prompt, &prepared.params)
            .await?;
        self.persist(
            request.project_id,
            request.stage_type,
            &prepared.params,
            content,
        )
        .await
    }

    /// Generate as a stream of tokens followed by one `Done` event.
    ///
    /// Preparation and the upstream request happen before this returns, so
    /// their failures surface as an `Err` here rather than inside the stream.
    pub async fn stream(&self, request: GenerateRequest) -> Result<EventStream, StoryflowError> {
        let prepared = self.prepare(&request).await?;
        let tokens: TokenStream = prepared
            .generator
            .stream_generate(&prepared.prompt, &prepared.params)
            .await?;
        let params = prepared.params;
        let orchestrator = self.clone();

        let events = async_stream::stream! {
            let mut tokens = tokens;
            let mut content = String::new();
            while let Some(item) = tokens.next().await {
                match item {
                    Ok(token) => {
                        content.push_str(&token);
                        yield Ok(StreamEvent::Token(token));
                    }
                    Err(e) => {
                        tracing::warn!(
                            project_id = %request.project_id,
                            stage = %request.stage_type,
                            error = %e,
                            "Generation stream failed; nothing persisted"
                        );
                        yield Err(e);
                        return;
                    }
                }
            }
            let outcome = orchestrator
                .persist(request.project_id, request.stage_type, &params, content)
                .await;
            yield outcome.map(|o| StreamEvent::Done(Box::new(o)));
        };

        Ok(Box::pin(events))
    }
}
