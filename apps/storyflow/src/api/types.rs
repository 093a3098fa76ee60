//! # API Request/Response Types
//!
//! JSON bodies of the HTTP API that are not core entities.

use serde::{Deserialize, Serialize};
use storyflow_core::{StageType, StageVersion, VersionId};

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// ERROR RESPONSE
// =============================================================================

/// Body of every non-2xx JSON response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Machine-readable error class (`not_found`, `validation_error`, ...).
    pub kind: String,
}

// =============================================================================
// STAGE / VERSION REQUESTS
// =============================================================================

/// Body of `POST .../versions/restore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub version_id: VersionId,
}

/// Body of `PUT .../versions/{version_id}`. A missing or blank label clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelRequest {
    #[serde(default)]
    pub label: Option<String>,
}

/// Body of `PUT /prompts/{stage}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptUpdateRequest {
    pub content: String,
}

// =============================================================================
// GENERATION RESPONSES
// =============================================================================

/// Response of `POST /ai/generate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub content: String,
    pub model: String,
    pub stage_type: StageType,
    pub version: StageVersion,
}

/// Payload of the `done` SSE event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDone {
    pub stage_type: StageType,
    pub version_number: i64,
}

/// Payload of the `error` SSE event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamError {
    pub error: String,
}
