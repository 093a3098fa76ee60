//! # Storyflow HTTP API Module
//!
//! This module implements the HTTP REST API server using axum.
//!
//! ## Endpoints (prefix `/api/v1`)
//!
//! - `GET|POST /projects`, `GET|PUT|DELETE /projects/{id}`
//! - `GET /projects/{id}/stages`, `GET|PUT /projects/{id}/stages/{stage}`
//! - `POST /projects/{id}/stages/{stage}/complete`, `GET .../context`
//! - `GET .../versions`, `POST .../versions/restore`,
//!   `PUT|DELETE .../versions/{version_id}`
//! - `POST /ai/generate`, `POST /ai/generate/stream` (Server-Sent Events)
//! - `GET|POST /settings/ai`, `GET|PUT|DELETE /settings/ai/{id}`,
//!   `POST /settings/ai/{id}/test`
//! - `GET /prompts`, `GET|PUT /prompts/{stage}`, `POST /prompts/{stage}/reset`
//! - `GET /projects/{id}/export/{kind}`, `POST /projects/import`
//! - `GET /health` (no prefix, never authenticated)
//!
//! ## Security Configuration
//!
//! - `cors_origins`: comma-separated list of allowed origins, or "*" for all (default: localhost only)
//! - `rate_limit` / `ai_rate_limit`: requests per minute (0 disables)
//! - `api_key`: if set, requires Bearer token authentication

mod auth;
mod handlers;
mod middleware;
mod types;

pub use auth::{ApiKey, keys_match};
pub use handlers::{api_error, error_status};
pub use middleware::{GlobalRateLimiter, create_rate_limiter};
pub use types::{
    ErrorResponse, GenerateResponse, HealthResponse, LabelRequest, PromptUpdateRequest,
    RestoreRequest, StreamDone, StreamError,
};

use crate::config::AppConfig;
use crate::generation::{GeneratorFactory, HttpGeneratorFactory, Orchestrator};
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post, put},
};
use std::sync::Arc;
use storyflow_core::{SecretBox, Store, StoryflowError};
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Request bodies above this size are rejected.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    /// The single store connection. Never held across a generator call.
    pub store: Arc<Mutex<Store>>,
    pub secrets: SecretBox,
    pub factory: Arc<dyn GeneratorFactory>,
    pub orchestrator: Orchestrator,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Create app state around an open store.
    pub fn new(
        store: Store,
        secrets: SecretBox,
        factory: Arc<dyn GeneratorFactory>,
        config: AppConfig,
    ) -> Self {
        let store = Arc::new(Mutex::new(store));
        let orchestrator = Orchestrator::new(
            Arc::clone(&store),
            secrets.clone(),
            Arc::clone(&factory),
        );
        Self {
            store,
            secrets,
            factory,
            orchestrator,
            config: Arc::new(config),
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

fn cors_methods() -> [Method; 5] {
    [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ]
}

/// Build the CORS layer from `cors_origins`.
///
/// - `"*"`: allows all origins
/// - absent: localhost only
/// - otherwise: the comma-separated list of allowed origins
fn build_cors_layer(origins: Option<&str>) -> CorsLayer {
    match origins {
        Some("*") => {
            tracing::warn!(
                "CORS: Allowing ALL origins (cors_origins=*). This is insecure for production!"
            );
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed_origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => {
                            tracing::info!("CORS: Allowing origin: {}", trimmed);
                            Some(hv)
                        }
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed_origins.is_empty() {
                tracing::warn!(
                    "CORS: No valid origins in cors_origins, defaulting to localhost only"
                );
                build_localhost_cors()
            } else {
                CorsLayer::new()
                    .allow_origin(allowed_origins)
                    .allow_methods(cors_methods())
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            }
        }
        None => {
            tracing::info!("CORS: No cors_origins set, defaulting to localhost only");
            build_localhost_cors()
        }
    }
}

/// Build a restrictive CORS layer that only allows localhost origins.
fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:5173",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:5173",
        "http://127.0.0.1:8080",
    ]
    .iter()
    .filter_map(|origin| origin.parse::<HeaderValue>().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(cors_methods())
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Generation routes, behind their own rate limiter.
fn ai_routes(ai_limiter: Option<GlobalRateLimiter>) -> Router<AppState> {
    let router = Router::new()
        .route("/ai/generate", post(handlers::generate_handler))
        .route(
            "/ai/generate/stream",
            post(handlers::generate_stream_handler),
        )
        .route(
            "/settings/ai/{id}/test",
            post(handlers::test_settings_handler),
        );
    match ai_limiter {
        Some(limiter) => router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        )),
        None => router,
    }
}

fn v1_routes() -> Router<AppState> {
    Router::new()
        // Projects
        .route(
            "/projects",
            get(handlers::list_projects_handler).post(handlers::create_project_handler),
        )
        .route("/projects/import", post(handlers::import_handler))
        .route(
            "/projects/{id}",
            get(handlers::get_project_handler)
                .put(handlers::update_project_handler)
                .delete(handlers::delete_project_handler),
        )
        .route(
            "/projects/{id}/export/{kind}",
            get(handlers::export_handler),
        )
        // Stages
        .route("/projects/{id}/stages", get(handlers::list_stages_handler))
        .route(
            "/projects/{id}/stages/{stage}",
            get(handlers::get_stage_handler).put(handlers::update_stage_handler),
        )
        .route(
            "/projects/{id}/stages/{stage}/complete",
            post(handlers::complete_stage_handler),
        )
        .route(
            "/projects/{id}/stages/{stage}/context",
            get(handlers::stage_context_handler),
        )
        // Versions
        .route(
            "/projects/{id}/stages/{stage}/versions",
            get(handlers::list_versions_handler),
        )
        .route(
            "/projects/{id}/stages/{stage}/versions/restore",
            post(handlers::restore_version_handler),
        )
        .route(
            "/projects/{id}/stages/{stage}/versions/{version_id}",
            put(handlers::label_version_handler).delete(handlers::delete_version_handler),
        )
        // Settings
        .route(
            "/settings/ai",
            get(handlers::list_settings_handler).post(handlers::create_settings_handler),
        )
        .route(
            "/settings/ai/{id}",
            get(handlers::get_settings_handler)
                .put(handlers::update_settings_handler)
                .delete(handlers::delete_settings_handler),
        )
        // Prompts
        .route("/prompts", get(handlers::list_prompts_handler))
        .route(
            "/prompts/{stage}",
            get(handlers::get_prompt_handler).put(handlers::update_prompt_handler),
        )
        .route(
            "/prompts/{stage}/reset",
            post(handlers::reset_prompt_handler),
        )
}

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing - logs all requests
/// 2. CORS - handles preflight requests
/// 3. Body limit
/// 4. Global rate limiting (if enabled)
/// 5. Authentication (if an API key is configured)
/// 6. Generation rate limiting on `/ai/*` and connection tests (if enabled)
pub fn create_router(state: AppState) -> Router {
    let config = Arc::clone(&state.config);
    let cors = build_cors_layer(config.cors_origins.as_deref());

    let rate_limiter = create_rate_limiter(config.rate_limit);
    match rate_limiter {
        Some(_) => tracing::info!(
            "Rate limiting enabled: {} requests/minute",
            config.rate_limit
        ),
        None => tracing::info!("Rate limiting disabled"),
    }
    let ai_limiter = create_rate_limiter(config.ai_rate_limit);
    if ai_limiter.is_some() {
        tracing::info!(
            "Generation rate limiting enabled: {} requests/minute",
            config.ai_rate_limit
        );
    }

    let api_key: Option<ApiKey> = config.api_key().map(Arc::from);
    if api_key.is_some() {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!(
            "API key authentication DISABLED - all endpoints are publicly accessible! \
             Set STORYFLOW_API_KEY to enable authentication."
        );
    }

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .nest("/api/v1", v1_routes().merge(ai_routes(ai_limiter)));

    if let Some(key) = api_key {
        router = router.layer(axum_middleware::from_fn_with_state(
            key,
            auth::api_key_auth_middleware,
        ));
    }

    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(axum::extract::DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Open everything the server needs and serve until the process stops.
pub async fn run_server(config: AppConfig) -> Result<(), StoryflowError> {
    let secrets = config.secret_box()?;
    let store = Store::open(&config.database)?;
    let factory: Arc<dyn GeneratorFactory> =
        Arc::new(HttpGeneratorFactory::new(config.request_timeout())?);
    let addr = config.bind_addr();

    let state = AppState::new(store, secrets, factory, config);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| StoryflowError::IoError(format!("Bind failed: {}", e)))?;

    tracing::info!("Storyflow HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| StoryflowError::IoError(format!("Server error: {}", e)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Cannot listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
