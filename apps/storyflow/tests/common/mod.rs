//! Scripted generator backend shared by the integration tests.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code, clippy::unwrap_used)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use storyflow::generation::{ConnectionCheck, Generator, GeneratorFactory, TokenStream};
use storyflow_core::{AiSettings, GenerationParams, SecretBox, StoryflowError};

/// One recorded generator call.
#[derive(Debug, Clone)]
pub struct Call {
    pub prompt: String,
    pub params: GenerationParams,
    pub api_key: String,
}

/// What the scripted backend answers with.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub tokens: Vec<&'static str>,
    /// Fail the stream after this many tokens.
    pub fail_after: Option<usize>,
    /// Fail the request before any token.
    pub refuse: bool,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Script {
    pub fn tokens(tokens: &[&'static str]) -> Self {
        Self {
            tokens: tokens.to_vec(),
            ..Self::default()
        }
    }

    pub fn failing_after(tokens: &[&'static str], n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::tokens(tokens)
        }
    }

    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, prompt: &str, params: &GenerationParams, api_key: &str) {
        self.calls.lock().unwrap().push(Call {
            prompt: prompt.to_string(),
            params: params.clone(),
            api_key: api_key.to_string(),
        });
    }
}

/// Factory handing out generators that play back a [`Script`].
pub struct ScriptedFactory {
    pub script: Script,
}

impl ScriptedFactory {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self { script })
    }
}

impl GeneratorFactory for ScriptedFactory {
    fn create(
        &self,
        settings: &AiSettings,
        secrets: &SecretBox,
    ) -> Result<Box<dyn Generator>, StoryflowError> {
        Ok(Box::new(ScriptedGenerator {
            script: self.script.clone(),
            api_key: settings.decrypt_api_key(secrets)?,
        }))
    }
}

struct ScriptedGenerator {
    script: Script,
    api_key: String,
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, StoryflowError> {
        self.script.record(prompt, params, &self.api_key);
        if self.script.refuse {
            return Err(StoryflowError::upstream(Some(503), "overloaded"));
        }
        Ok(self.script.tokens.concat())
    }

    async fn stream_generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<TokenStream, StoryflowError> {
        self.script.record(prompt, params, &self.api_key);
        if self.script.refuse {
            return Err(StoryflowError::upstream(Some(503), "overloaded"));
        }
        let mut items: Vec<Result<String, StoryflowError>> = self
            .script
            .tokens
            .iter()
            .map(|t| Ok((*t).to_string()))
            .collect();
        if let Some(n) = self.script.fail_after {
            items.truncate(n);
            items.push(Err(StoryflowError::upstream(None, "connection reset")));
        }
        Ok(Box::pin(futures::stream::iter(items)))
    }

    async fn test_connection(&self) -> ConnectionCheck {
        if self.script.refuse {
            ConnectionCheck::failed("endpoint refused")
        } else {
            ConnectionCheck::ok("scripted-model")
        }
    }
}
