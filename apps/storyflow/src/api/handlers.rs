//! # API Endpoint Handlers
//!
//! Handlers lock the store only for the duration of one core call.
//! Generation goes through the orchestrator, which releases the lock while
//! the upstream endpoint is working.

use super::{
    AppState,
    types::{
        ErrorResponse, GenerateResponse, HealthResponse, LabelRequest, PromptUpdateRequest,
        RestoreRequest, StreamDone, StreamError,
    },
};
use crate::generation::{ConnectionCheck, GenerateRequest, StreamEvent};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderName, HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::{Stream, StreamExt};
use std::convert::Infallible;
use storyflow_core::{
    AiSettings, ExportKind, NewProject, NewSettings, Page, Project, ProjectDetail, ProjectId,
    ProjectQuery, ProjectUpdate, SettingsId, SettingsUpdate, Stage, StageContext, StageEdit,
    StageType, StageVersion, StoryflowError, SystemPrompt, VersionId, decode_archive,
    stage_context,
};

/// Error half of every handler result.
pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Handler result carrying a JSON body.
pub type ApiResult<T> = Result<(StatusCode, Json<T>), ApiError>;

/// Header listing how many bundle entries were skipped.
const SKIPPED_HEADER: &str = "x-storyflow-skipped";

// =============================================================================
// ERROR MAPPING
// =============================================================================

/// HTTP status of a core error.
pub fn error_status(error: &StoryflowError) -> StatusCode {
    match error {
        StoryflowError::NotFound(_) => StatusCode::NOT_FOUND,
        StoryflowError::ConfigurationError(_) | StoryflowError::SerializationError(_) => {
            StatusCode::BAD_REQUEST
        }
        StoryflowError::UpstreamError { .. } => StatusCode::BAD_GATEWAY,
        StoryflowError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
        StoryflowError::StorageError(_) | StoryflowError::IoError(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_kind(error: &StoryflowError) -> &'static str {
    match error {
        StoryflowError::NotFound(_) => "not_found",
        StoryflowError::ConfigurationError(_) => "configuration_error",
        StoryflowError::UpstreamError { .. } => "upstream_error",
        StoryflowError::ValidationError(_) => "validation_error",
        StoryflowError::StorageError(_) => "storage_error",
        StoryflowError::SerializationError(_) => "serialization_error",
        StoryflowError::IoError(_) => "io_error",
    }
}

/// Convert a core error into the JSON error response.
pub fn api_error(error: StoryflowError) -> ApiError {
    let status = error_status(&error);
    if status.is_server_error() {
        tracing::error!(error = %error, status = status.as_u16(), "Request failed");
    } else {
        tracing::debug!(error = %error, status = status.as_u16(), "Request rejected");
    }
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            kind: error_kind(&error).to_string(),
        }),
    )
}

fn parse_stage(stage: &str) -> Result<StageType, ApiError> {
    stage.parse().map_err(api_error)
}

fn ok<T>(body: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(body)))
}

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// PROJECT HANDLERS
// =============================================================================

/// `GET /projects?page=&page_size=&search=`
pub async fn list_projects_handler(
    State(state): State<AppState>,
    Query(query): Query<ProjectQuery>,
) -> ApiResult<Page<Project>> {
    let store = state.store.lock().await;
    ok(store.list_projects(&query).map_err(api_error)?)
}

pub async fn create_project_handler(
    State(state): State<AppState>,
    Json(input): Json<NewProject>,
) -> ApiResult<ProjectDetail> {
    let detail = state
        .store
        .lock()
        .await
        .create_project(&input)
        .map_err(api_error)?;
    tracing::info!(project_id = %detail.project.id, "Project created");
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn get_project_handler(
    State(state): State<AppState>,
    Path(id): Path<ProjectId>,
) -> ApiResult<ProjectDetail> {
    let store = state.store.lock().await;
    ok(store.get_project(id).map_err(api_error)?)
}

pub async fn update_project_handler(
    State(state): State<AppState>,
    Path(id): Path<ProjectId>,
    Json(update): Json<ProjectUpdate>,
) -> ApiResult<Project> {
    let mut store = state.store.lock().await;
    ok(store.update_project(id, &update).map_err(api_error)?)
}

/// Soft delete: the project disappears from listings but stays on disk.
pub async fn delete_project_handler(
    State(state): State<AppState>,
    Path(id): Path<ProjectId>,
) -> Result<StatusCode, ApiError> {
    state
        .store
        .lock()
        .await
        .delete_project(id)
        .map_err(api_error)?;
    tracing::info!(project_id = %id, "Project deleted");
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// STAGE HANDLERS
// =============================================================================

pub async fn list_stages_handler(
    State(state): State<AppState>,
    Path(id): Path<ProjectId>,
) -> ApiResult<Vec<Stage>> {
    let store = state.store.lock().await;
    ok(store.list_stages(id).map_err(api_error)?)
}

pub async fn get_stage_handler(
    State(state): State<AppState>,
    Path((id, stage)): Path<(ProjectId, String)>,
) -> ApiResult<Stage> {
    let stage = parse_stage(&stage)?;
    let store = state.store.lock().await;
    ok(store.get_stage(id, stage).map_err(api_error)?)
}

/// Manual edit. Snapshots the replaced content when it changes.
pub async fn update_stage_handler(
    State(state): State<AppState>,
    Path((id, stage)): Path<(ProjectId, String)>,
    Json(edit): Json<StageEdit>,
) -> ApiResult<Stage> {
    let stage = parse_stage(&stage)?;
    let mut store = state.store.lock().await;
    ok(store.set_content(id, stage, &edit).map_err(api_error)?)
}

pub async fn complete_stage_handler(
    State(state): State<AppState>,
    Path((id, stage)): Path<(ProjectId, String)>,
) -> ApiResult<Stage> {
    let stage = parse_stage(&stage)?;
    let mut store = state.store.lock().await;
    ok(store.complete_stage(id, stage).map_err(api_error)?)
}

/// Prompt context a generation of this stage would receive.
pub async fn stage_context_handler(
    State(state): State<AppState>,
    Path((id, stage)): Path<(ProjectId, String)>,
) -> ApiResult<StageContext> {
    let stage = parse_stage(&stage)?;
    let store = state.store.lock().await;
    let detail = store.get_project(id).map_err(api_error)?;
    ok(stage_context(&detail, stage))
}

// =============================================================================
// VERSION HANDLERS
// =============================================================================

/// Version history, newest first.
pub async fn list_versions_handler(
    State(state): State<AppState>,
    Path((id, stage)): Path<(ProjectId, String)>,
) -> ApiResult<Vec<StageVersion>> {
    let stage = parse_stage(&stage)?;
    let store = state.store.lock().await;
    ok(store.list_versions(id, stage).map_err(api_error)?)
}

pub async fn restore_version_handler(
    State(state): State<AppState>,
    Path((id, stage)): Path<(ProjectId, String)>,
    Json(request): Json<RestoreRequest>,
) -> ApiResult<Stage> {
    let stage = parse_stage(&stage)?;
    let mut store = state.store.lock().await;
    ok(store
        .restore_version(id, stage, request.version_id)
        .map_err(api_error)?)
}

pub async fn label_version_handler(
    State(state): State<AppState>,
    Path((id, stage, version_id)): Path<(ProjectId, String, VersionId)>,
    Json(request): Json<LabelRequest>,
) -> ApiResult<StageVersion> {
    let stage = parse_stage(&stage)?;
    let mut store = state.store.lock().await;
    ok(store
        .rename_version(id, stage, version_id, request.label.as_deref())
        .map_err(api_error)?)
}

pub async fn delete_version_handler(
    State(state): State<AppState>,
    Path((id, stage, version_id)): Path<(ProjectId, String, VersionId)>,
) -> Result<StatusCode, ApiError> {
    let stage = parse_stage(&stage)?;
    let mut store = state.store.lock().await;
    store
        .delete_version(id, stage, version_id)
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// GENERATION HANDLERS
// =============================================================================

/// Generate a stage in one request.
pub async fn generate_handler(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> ApiResult<GenerateResponse> {
    let outcome = state
        .orchestrator
        .generate(&request)
        .await
        .map_err(api_error)?;
    ok(GenerateResponse {
        content: outcome.stage.content.clone(),
        model: outcome.version.ai_model.clone().unwrap_or_default(),
        stage_type: request.stage_type,
        version: outcome.version,
    })
}

fn sse_event<T: serde::Serialize>(name: &str, payload: &T) -> Event {
    let json = serde_json::to_string(payload).unwrap_or_default();
    Event::default().event(name).data(json)
}

/// Generate a stage as Server-Sent Events.
///
/// - `token`: `{"content": "..."}` per chunk
/// - `done`: after the content is persisted
/// - `error`: the generation failed; nothing was persisted
///
/// A client that disconnects before `done` leaves the stage untouched.
pub async fn generate_stream_handler(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let stage_type = request.stage_type;
    let events = state
        .orchestrator
        .stream(request)
        .await
        .map_err(api_error)?;

    let stream = events.map(move |item| {
        Ok(match item {
            Ok(StreamEvent::Token(content)) => {
                sse_event("token", &serde_json::json!({ "content": content }))
            }
            Ok(StreamEvent::Done(outcome)) => sse_event(
                "done",
                &StreamDone {
                    stage_type,
                    version_number: outcome.version.version_number,
                },
            ),
            Err(e) => sse_event(
                "error",
                &StreamError {
                    error: e.to_string(),
                },
            ),
        })
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// =============================================================================
// SETTINGS HANDLERS
// =============================================================================

pub async fn list_settings_handler(State(state): State<AppState>) -> ApiResult<Vec<AiSettings>> {
    let store = state.store.lock().await;
    ok(store.list_settings().map_err(api_error)?)
}

pub async fn create_settings_handler(
    State(state): State<AppState>,
    Json(input): Json<NewSettings>,
) -> ApiResult<AiSettings> {
    let settings = state
        .store
        .lock()
        .await
        .create_settings(&input, &state.secrets)
        .map_err(api_error)?;
    tracing::info!(settings_id = %settings.id, default = settings.is_default, "Settings created");
    Ok((StatusCode::CREATED, Json(settings)))
}

pub async fn get_settings_handler(
    State(state): State<AppState>,
    Path(id): Path<SettingsId>,
) -> ApiResult<AiSettings> {
    let store = state.store.lock().await;
    ok(store.get_settings(id).map_err(api_error)?)
}

pub async fn update_settings_handler(
    State(state): State<AppState>,
    Path(id): Path<SettingsId>,
    Json(update): Json<SettingsUpdate>,
) -> ApiResult<AiSettings> {
    let mut store = state.store.lock().await;
    ok(store
        .update_settings(id, &update, &state.secrets)
        .map_err(api_error)?)
}

pub async fn delete_settings_handler(
    State(state): State<AppState>,
    Path(id): Path<SettingsId>,
) -> Result<StatusCode, ApiError> {
    state
        .store
        .lock()
        .await
        .delete_settings(id)
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Probe the endpoint a settings row points at.
pub async fn test_settings_handler(
    State(state): State<AppState>,
    Path(id): Path<SettingsId>,
) -> ApiResult<ConnectionCheck> {
    let settings = {
        let store = state.store.lock().await;
        store.get_settings(id).map_err(api_error)?
    };
    let generator = state
        .factory
        .create(&settings, &state.secrets)
        .map_err(api_error)?;
    let check = generator.test_connection().await;
    tracing::info!(settings_id = %id, success = check.success, "Connection test");
    ok(check)
}

// =============================================================================
// PROMPT HANDLERS
// =============================================================================

pub async fn list_prompts_handler(State(state): State<AppState>) -> ApiResult<Vec<SystemPrompt>> {
    let store = state.store.lock().await;
    ok(store.list_prompts().map_err(api_error)?)
}

pub async fn get_prompt_handler(
    State(state): State<AppState>,
    Path(stage): Path<String>,
) -> ApiResult<SystemPrompt> {
    let stage = parse_stage(&stage)?;
    let store = state.store.lock().await;
    ok(store.get_prompt(stage).map_err(api_error)?)
}

pub async fn update_prompt_handler(
    State(state): State<AppState>,
    Path(stage): Path<String>,
    Json(request): Json<PromptUpdateRequest>,
) -> ApiResult<SystemPrompt> {
    let stage = parse_stage(&stage)?;
    let mut store = state.store.lock().await;
    ok(store
        .update_prompt(stage, &request.content)
        .map_err(api_error)?)
}

pub async fn reset_prompt_handler(
    State(state): State<AppState>,
    Path(stage): Path<String>,
) -> ApiResult<SystemPrompt> {
    let stage = parse_stage(&stage)?;
    let mut store = state.store.lock().await;
    ok(store.reset_prompt(stage).map_err(api_error)?)
}

// =============================================================================
// EXPORT / IMPORT HANDLERS
// =============================================================================

/// Download a project rendering as an attachment.
pub async fn export_handler(
    State(state): State<AppState>,
    Path((id, kind)): Path<(ProjectId, String)>,
) -> Result<Response, ApiError> {
    let kind: ExportKind = kind.parse().map_err(api_error)?;
    let file = {
        let store = state.store.lock().await;
        store
            .render_export(id, kind, chrono::Utc::now())
            .map_err(api_error)?
    };

    for entry in &file.skipped {
        tracing::warn!(
            project_id = %id,
            file = %entry.file,
            reason = %entry.reason,
            "Bundle entry skipped"
        );
    }

    let skipped = file.skipped.len();
    let disposition = format!("attachment; filename=\"{}\"", file.file_name);
    let mut response = file.bytes.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(kind.content_type()),
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if kind == ExportKind::Bundle {
        headers.insert(
            HeaderName::from_static(SKIPPED_HEADER),
            HeaderValue::from(skipped),
        );
    }
    Ok(response)
}

/// Create a new project from archive bytes.
pub async fn import_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<ProjectDetail> {
    let archive = decode_archive(&body).map_err(api_error)?;
    let detail = state
        .store
        .lock()
        .await
        .import_archive(&archive)
        .map_err(api_error)?;
    tracing::info!(project_id = %detail.project.id, "Project imported");
    Ok((StatusCode::CREATED, Json(detail)))
}
