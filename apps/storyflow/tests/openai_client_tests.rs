//! Tests of the OpenAI-compatible backend against a local upstream.
//!
//! The upstream is a small axum app bound to an ephemeral port. Its
//! streamed answer splits SSE lines across body chunks.

#![allow(clippy::unwrap_used, clippy::panic)]

use axum::{
    Json, Router,
    body::Body,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{Value, json};
use std::time::Duration;
use storyflow::generation::{
    Generator, GeneratorFactory, HttpGeneratorFactory, OpenAiGenerator,
};
use storyflow_core::{GenerationParams, NewSettings, SecretBox, Store, StoryflowError};

// =============================================================================
// LOCAL UPSTREAM
// =============================================================================

const GOOD_KEY: &str = "good-key";
const SLOW_TOKEN_COUNT: usize = 8;
const SLOW_TOKEN_GAP: Duration = Duration::from_millis(300);

fn bearer(headers: &HeaderMap) -> &str {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("none")
}

async fn chat(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if body["model"] == "broken" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "model exploded").into_response();
    }

    if body["model"] == "slow" {
        return (
            [(header::CONTENT_TYPE, "text/event-stream")],
            Body::from_stream(slow_tokens()),
        )
            .into_response();
    }

    if body["stream"] == true {
        let chunks = vec![
            Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n"),
            Bytes::from_static(
                b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choi",
            ),
            Bytes::from_static(
                b"ces\":[{\"delta\":{\"content\":\"lo\"}}]}\r\n\r\n: keep-alive\n\n",
            ),
            Bytes::from_static(
                b"data: [DONE]\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
            ),
        ];
        let stream = futures::stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>));
        return (
            [(header::CONTENT_TYPE, "text/event-stream")],
            Body::from_stream(stream),
        )
            .into_response();
    }

    let prompt = body["messages"][0]["content"].as_str().unwrap_or_default();
    Json(json!({
        "choices": [{
            "message": {
                "role": "assistant",
                "content": format!("{} | {} | {}", prompt, body["max_tokens"], bearer(&headers))
            }
        }]
    }))
    .into_response()
}

/// One token every [`SLOW_TOKEN_GAP`], then `[DONE]`.
fn slow_tokens() -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> {
    futures::stream::unfold(0usize, |sent| async move {
        if sent > SLOW_TOKEN_COUNT {
            return None;
        }
        tokio::time::sleep(SLOW_TOKEN_GAP).await;
        let line = if sent == SLOW_TOKEN_COUNT {
            "data: [DONE]\n\n".to_string()
        } else {
            format!(
                "data: {{\"choices\":[{{\"delta\":{{\"content\":\"t{}\"}}}}]}}\n\n",
                sent
            )
        };
        Some((Ok(Bytes::from(line)), sent + 1))
    })
}

async fn models(headers: HeaderMap) -> StatusCode {
    if bearer(&headers) == format!("Bearer {}", GOOD_KEY) {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    }
}

/// Start the upstream and return its base URL (with a trailing slash).
async fn spawn_upstream() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new()
        .route("/v1/chat/completions", post(chat))
        .route("/v1/models", get(models));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/v1/", addr)
}

fn params(model: &str) -> GenerationParams {
    GenerationParams {
        model: model.to_string(),
        temperature: 0.7,
        top_p: 1.0,
        max_tokens: 512,
    }
}

fn generator(base_url: &str, api_key: &str) -> OpenAiGenerator {
    OpenAiGenerator::new(
        reqwest::Client::new(),
        base_url,
        "gpt-test",
        api_key.to_string(),
    )
}

// =============================================================================
// TESTS
// =============================================================================

#[tokio::test]
async fn generate_returns_the_first_choice() {
    let base = spawn_upstream().await;

    let text = generator(&base, GOOD_KEY)
        .generate("write a haiku", &params("gpt-test"))
        .await
        .unwrap();

    assert_eq!(text, "write a haiku | 512 | Bearer good-key");
}

#[tokio::test]
async fn empty_key_sends_no_authorization() {
    let base = spawn_upstream().await;

    let text = generator(&base, "")
        .generate("hi", &params("gpt-test"))
        .await
        .unwrap();

    assert!(text.ends_with("| none"));
}

#[tokio::test]
async fn upstream_status_is_reported() {
    let base = spawn_upstream().await;

    let result = generator(&base, GOOD_KEY)
        .generate("hi", &params("broken"))
        .await;

    match result {
        Err(StoryflowError::UpstreamError { status, message }) => {
            assert_eq!(status, Some(500));
            assert!(message.contains("model exploded"));
        }
        other => panic!("expected upstream error, got {:?}", other),
    }
}

#[tokio::test]
async fn stream_reassembles_split_lines_and_stops_at_done() {
    let base = spawn_upstream().await;

    let tokens: Vec<String> = generator(&base, GOOD_KEY)
        .stream_generate("hi", &params("gpt-test"))
        .await
        .unwrap()
        .map(|item| item.unwrap())
        .collect()
        .await;

    assert_eq!(tokens, vec!["Hel", "lo"]);
}

#[tokio::test]
async fn stream_error_status_fails_before_streaming() {
    let base = spawn_upstream().await;

    let result = generator(&base, GOOD_KEY)
        .stream_generate("hi", &params("broken"))
        .await;

    assert!(matches!(
        result,
        Err(StoryflowError::UpstreamError {
            status: Some(500),
            ..
        })
    ));
}

#[tokio::test]
async fn unreachable_endpoint_is_an_upstream_error() {
    // Bind then drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = generator(&format!("http://{}/v1", addr), GOOD_KEY)
        .generate("hi", &params("gpt-test"))
        .await;

    assert!(matches!(
        result,
        Err(StoryflowError::UpstreamError { status: None, .. })
    ));
}

#[tokio::test]
async fn connection_test_checks_the_key() {
    let base = spawn_upstream().await;

    let ok = generator(&base, GOOD_KEY).test_connection().await;
    assert!(ok.success);
    assert_eq!(ok.model.as_deref(), Some("gpt-test"));

    let denied = generator(&base, "bad-key").test_connection().await;
    assert!(!denied.success);
    assert!(denied.message.contains("401"));
}

#[tokio::test]
async fn factory_builds_a_generator_from_stored_settings() {
    let base = spawn_upstream().await;
    let secrets = SecretBox::new("factory-test");
    let mut store = Store::open_in_memory().unwrap();
    let settings = store
        .create_settings(
            &NewSettings {
                name: "local".to_string(),
                base_url: base,
                model: "gpt-local".to_string(),
                api_key: GOOD_KEY.to_string(),
                ..NewSettings::default()
            },
            &secrets,
        )
        .unwrap();

    let factory = HttpGeneratorFactory::new(Duration::from_secs(5)).unwrap();
    let check = factory
        .create(&settings, &secrets)
        .unwrap()
        .test_connection()
        .await;

    assert!(check.success, "{}", check.message);
    assert_eq!(check.model.as_deref(), Some("gpt-local"));
}

#[tokio::test]
async fn steady_stream_outlives_the_read_timeout() {
    let base = spawn_upstream().await;
    let secrets = SecretBox::new("factory-test");
    let mut store = Store::open_in_memory().unwrap();
    let settings = store
        .create_settings(
            &NewSettings {
                name: "slow".to_string(),
                base_url: base,
                model: "slow".to_string(),
                ..NewSettings::default()
            },
            &secrets,
        )
        .unwrap();

    // The whole answer takes about 2.7 s, but no gap exceeds 300 ms.
    let factory = HttpGeneratorFactory::new(Duration::from_secs(1)).unwrap();
    let generator = factory.create(&settings, &secrets).unwrap();
    let items: Vec<Result<String, StoryflowError>> = generator
        .stream_generate("hi", &params("slow"))
        .await
        .unwrap()
        .collect()
        .await;

    let tokens: Vec<String> = items.into_iter().map(|item| item.unwrap()).collect();
    assert_eq!(tokens.len(), SLOW_TOKEN_COUNT);
    assert_eq!(tokens.first().map(String::as_str), Some("t0"));
    assert_eq!(tokens.last().map(String::as_str), Some("t7"));
}
