//! Orchestrator tests against a scripted backend.
//!
//! Covers when a generation is persisted: exactly once after a stream ends
//! on its own, never after an error or an abandoned stream.

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use common::{Script, ScriptedFactory};
use futures::StreamExt;
use std::sync::Arc;
use storyflow::generation::{GenerateRequest, Orchestrator, StreamEvent};
use storyflow_core::{
    NewProject, NewSettings, ProjectId, SecretBox, SettingsId, StageEdit, StageStatus, StageType,
    Store, StoryflowError, VersionSource,
};
use tokio::sync::Mutex;

struct Fixture {
    store: Arc<Mutex<Store>>,
    orchestrator: Orchestrator,
    project: ProjectId,
    settings: SettingsId,
}

async fn fixture(script: Script) -> Fixture {
    let secrets = SecretBox::new("generation-test");
    let mut store = Store::open_in_memory().unwrap();
    let project = store
        .create_project(&NewProject::named("Lighthouse"))
        .unwrap()
        .project
        .id;
    let idea = StageEdit::content("a keeper who counts ships");
    store.set_content(project, StageType::Idea, &idea).unwrap();
    let settings = store
        .create_settings(
            &NewSettings {
                name: "primary".to_string(),
                model: "gpt-test".to_string(),
                is_default: true,
                ..NewSettings::default()
            },
            &secrets,
        )
        .unwrap()
        .id;

    let store = Arc::new(Mutex::new(store));
    let factory = ScriptedFactory::new(script);
    let orchestrator = Orchestrator::new(Arc::clone(&store), secrets, factory);
    Fixture {
        store,
        orchestrator,
        project,
        settings,
    }
}

impl Fixture {
    fn request(&self, stage: StageType) -> GenerateRequest {
        GenerateRequest::new(self.project, stage)
    }

    async fn story_versions(&self) -> usize {
        self.store
            .lock()
            .await
            .list_versions(self.project, StageType::Story)
            .unwrap()
            .len()
    }
}

// =============================================================================
// ONE-SHOT GENERATION
// =============================================================================

#[tokio::test]
async fn generate_records_content_and_parameters() {
    let script = Script::tokens(&["The ", "keeper ", "waits."]);
    let fx = fixture(script.clone()).await;

    let request = GenerateRequest {
        temperature: Some(1.1),
        max_tokens: Some(800),
        ..fx.request(StageType::Story)
    };
    let outcome = fx.orchestrator.generate(&request).await.unwrap();

    assert_eq!(outcome.stage.content, "The keeper waits.");
    assert_eq!(outcome.stage.status, StageStatus::InProgress);
    assert_eq!(outcome.stage.last_ai_model.as_deref(), Some("gpt-test"));
    assert_eq!(outcome.version.source, VersionSource::Ai);
    assert_eq!(outcome.version.content, "The keeper waits.");

    let params = outcome.version.ai_params.unwrap();
    assert_eq!(params["max_tokens"], 800);
    assert_eq!(params["temperature"], 1.1);

    let calls = script.calls();
    assert_eq!(calls[0].params.max_tokens, 800);
    assert!(calls[0].prompt.contains("a keeper who counts ships"));
}

#[tokio::test]
async fn custom_prompt_replaces_the_stored_template() {
    let script = Script::tokens(&["ok"]);
    let fx = fixture(script.clone()).await;

    let request = GenerateRequest {
        custom_prompt: Some("Summarise {idea} for {script}.".to_string()),
        ..fx.request(StageType::Story)
    };
    fx.orchestrator.generate(&request).await.unwrap();

    assert_eq!(
        script.calls()[0].prompt,
        "Summarise a keeper who counts ships for [not provided]."
    );
}

#[tokio::test]
async fn blank_custom_prompt_falls_back_to_the_stored_template() {
    let script = Script::tokens(&["ok"]);
    let fx = fixture(script.clone()).await;
    let stored = fx
        .store
        .lock()
        .await
        .get_prompt(StageType::Story)
        .unwrap()
        .content;

    let request = GenerateRequest {
        custom_prompt: Some("   ".to_string()),
        ..fx.request(StageType::Story)
    };
    fx.orchestrator.generate(&request).await.unwrap();

    let prompt = &script.calls()[0].prompt;
    assert!(prompt.starts_with(stored.lines().next().unwrap()));
    assert!(prompt.contains("a keeper who counts ships"));
}

#[tokio::test]
async fn empty_output_is_an_upstream_error() {
    let fx = fixture(Script::tokens(&[])).await;

    let result = fx
        .orchestrator
        .generate(&fx.request(StageType::Story))
        .await;

    assert!(matches!(result, Err(StoryflowError::UpstreamError { .. })));
    assert_eq!(fx.story_versions().await, 0);
}

#[tokio::test]
async fn out_of_range_override_is_rejected_before_calling_out() {
    let script = Script::tokens(&["never"]);
    let fx = fixture(script.clone()).await;

    let request = GenerateRequest {
        max_tokens: Some(20),
        ..fx.request(StageType::Story)
    };
    let result = fx.orchestrator.generate(&request).await;

    assert!(matches!(result, Err(StoryflowError::ValidationError(_))));
    assert!(script.calls().is_empty());
}

#[tokio::test]
async fn inactive_explicit_settings_are_not_found() {
    let fx = fixture(Script::tokens(&["x"])).await;
    {
        let mut store = fx.store.lock().await;
        let secrets = SecretBox::new("generation-test");
        store
            .update_settings(
                fx.settings,
                &storyflow_core::SettingsUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
                &secrets,
            )
            .unwrap();
    }

    let request = GenerateRequest {
        settings_id: Some(fx.settings),
        ..fx.request(StageType::Story)
    };
    let result = fx.orchestrator.generate(&request).await;

    assert!(matches!(result, Err(StoryflowError::NotFound(_))));
}

// =============================================================================
// STREAMING GENERATION
// =============================================================================

#[tokio::test]
async fn exhausted_stream_persists_once() {
    let fx = fixture(Script::tokens(&["A ", "B ", "C"])).await;

    let events: Vec<_> = fx
        .orchestrator
        .stream(fx.request(StageType::Story))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(events.len(), 4);
    let tokens: String = events
        .iter()
        .filter_map(|e| match e {
            Ok(StreamEvent::Token(t)) => Some(t.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(tokens, "A B C");
    match events.last() {
        Some(Ok(StreamEvent::Done(outcome))) => {
            assert_eq!(outcome.stage.content, "A B C");
            assert_eq!(outcome.version.version_number, 1);
        }
        other => panic!("expected done, got {:?}", other),
    }
    assert_eq!(fx.story_versions().await, 1);

    let store = fx.store.lock().await;
    let script = store.get_stage(fx.project, StageType::Script).unwrap();
    assert_eq!(script.status, StageStatus::Unlocked);
}

#[tokio::test]
async fn abandoned_stream_persists_nothing() {
    let fx = fixture(Script::tokens(&["A ", "B ", "C"])).await;

    let mut events = fx
        .orchestrator
        .stream(fx.request(StageType::Story))
        .await
        .unwrap();
    let first = events.next().await.unwrap().unwrap();
    assert!(matches!(first, StreamEvent::Token(_)));
    drop(events);

    assert_eq!(fx.story_versions().await, 0);
    let store = fx.store.lock().await;
    assert!(
        store
            .get_stage(fx.project, StageType::Story)
            .unwrap()
            .content
            .is_empty()
    );
}

#[tokio::test]
async fn failed_stream_persists_nothing() {
    let fx = fixture(Script::failing_after(&["A ", "B "], 1)).await;

    let events: Vec<_> = fx
        .orchestrator
        .stream(fx.request(StageType::Story))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], Ok(StreamEvent::Token(_))));
    assert!(matches!(
        events[1],
        Err(StoryflowError::UpstreamError { .. })
    ));
    assert_eq!(fx.story_versions().await, 0);
}

#[tokio::test]
async fn refused_stream_fails_before_any_event() {
    let fx = fixture(Script::refusing()).await;

    let result = fx.orchestrator.stream(fx.request(StageType::Story)).await;

    match result {
        Err(StoryflowError::UpstreamError { status, .. }) => assert_eq!(status, Some(503)),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("stream should not start"),
    }
}

#[tokio::test]
async fn store_is_not_locked_while_streaming() {
    let fx = fixture(Script::tokens(&["A ", "B"])).await;

    let mut events = fx
        .orchestrator
        .stream(fx.request(StageType::Story))
        .await
        .unwrap();
    events.next().await.unwrap().unwrap();

    // Another writer gets through mid-stream.
    fx.store
        .lock()
        .await
        .set_content(fx.project, StageType::Idea, &StageEdit::content("edited"))
        .unwrap();

    let rest: Vec<_> = events.collect().await;
    assert!(matches!(rest.last(), Some(Ok(StreamEvent::Done(_)))));
}
