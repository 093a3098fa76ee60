//! # Core Type Definitions
//!
//! This module contains all core types for the Storyflow workflow engine:
//! - Row identifiers (`ProjectId`, `StageId`, `VersionId`, `SettingsId`)
//! - Persisted entities (`Project`, `Stage`, `StageVersion`, `AiSettings`, `SystemPrompt`)
//! - Status and provenance enums (`StageStatus`, `VersionSource`, `Provider`)
//! - Mutation inputs with their validation (`NewProject`, `StageEdit`, `NewSettings`, ...)
//! - Error types (`StoryflowError`)

use crate::primitives::{
    MAX_BASE_URL_LENGTH, MAX_CATEGORY_LENGTH, MAX_CONTENT_LENGTH, MAX_DESCRIPTION_LENGTH,
    MAX_LABEL_LENGTH, MAX_MODEL_LENGTH, MAX_PAGE_SIZE, MAX_PROJECT_NAME_LENGTH,
    MAX_SETTINGS_NAME_LENGTH, MAX_TAG_COUNT, MAX_TAG_LENGTH, MAX_TEMPERATURE, MAX_TOKENS_CEILING,
    MAX_TOKENS_FLOOR, MAX_TOP_P,
};
use crate::registry::StageType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// ROW IDENTIFIERS
// =============================================================================

/// Identifier of a project row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub i64);

/// Identifier of a stage row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(pub i64);

/// Identifier of a stage version row. Distinct from the per-stage version number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(pub i64);

/// Identifier of a generation settings row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsId(pub i64);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SettingsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generation metadata attached to stages and versions (model parameters).
pub type Metadata = BTreeMap<String, serde_json::Value>;

// =============================================================================
// STAGE STATUS
// =============================================================================

/// Lifecycle status of a stage.
///
/// ```text
/// LOCKED --(predecessor gets content)--> UNLOCKED --(content set)--> IN_PROGRESS
///                                           ^                             |
///                                           +------(content cleared)------+
/// COMPLETED: explicit user action from any state; cleared content returns it to UNLOCKED.
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Locked,
    Unlocked,
    InProgress,
    Completed,
}

impl StageStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Locked => "locked",
            StageStatus::Unlocked => "unlocked",
            StageStatus::InProgress => "in_progress",
            StageStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageStatus {
    type Err = StoryflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "locked" => Ok(StageStatus::Locked),
            "unlocked" => Ok(StageStatus::Unlocked),
            "in_progress" => Ok(StageStatus::InProgress),
            "completed" => Ok(StageStatus::Completed),
            other => Err(StoryflowError::ValidationError(format!(
                "Unknown stage status: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// VERSION SOURCE
// =============================================================================

/// Where a version snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSource {
    /// Content replaced by a manual edit (the snapshot holds the *old* value).
    Manual,
    /// Content produced by a generator (the snapshot holds the *new* value).
    Ai,
    /// Content replaced by a restore (the snapshot holds the pre-restore value).
    Restore,
}

impl VersionSource {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            VersionSource::Manual => "manual",
            VersionSource::Ai => "ai",
            VersionSource::Restore => "restore",
        }
    }
}

impl FromStr for VersionSource {
    type Err = StoryflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(VersionSource::Manual),
            "ai" => Ok(VersionSource::Ai),
            "restore" => Ok(VersionSource::Restore),
            other => Err(StoryflowError::SerializationError(format!(
                "Unknown version source: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// PROVIDER
// =============================================================================

/// Generator backend family selected by a settings row.
///
/// Both variants speak the OpenAI-compatible chat-completions protocol today;
/// `Custom` covers self-hosted gateways that mirror it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Provider {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "custom")]
    Custom,
}

impl Provider {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Custom => "custom",
        }
    }
}

impl FromStr for Provider {
    type Err = StoryflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Provider::OpenAi),
            "custom" => Ok(Provider::Custom),
            other => Err(StoryflowError::ValidationError(format!(
                "Unsupported provider: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// PERSISTED ENTITIES
// =============================================================================

/// A content-creation project. Owns exactly one stage per [`StageType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One pipeline step of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub project_id: ProjectId,
    pub stage_type: StageType,
    pub status: StageStatus,
    pub content: String,
    pub last_ai_model: Option<String>,
    pub last_ai_params: Option<Metadata>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Stage {
    /// Whether the stage holds any content.
    #[must_use]
    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }
}

/// Immutable content snapshot of a stage. Only `label` may change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageVersion {
    pub id: VersionId,
    pub stage_id: StageId,
    pub version_number: i64,
    pub content: String,
    pub source: VersionSource,
    pub ai_model: Option<String>,
    pub ai_params: Option<Metadata>,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A project together with its eight stages in pipeline order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: Project,
    pub stages: Vec<Stage>,
}

impl ProjectDetail {
    /// Find the stage of the given type.
    #[must_use]
    pub fn stage(&self, stage_type: StageType) -> Option<&Stage> {
        self.stages.iter().find(|s| s.stage_type == stage_type)
    }
}

/// Configuration of an external generator endpoint.
///
/// The encrypted API key never leaves the crate in serialized form;
/// callers see only `has_api_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiSettings {
    pub id: SettingsId,
    pub name: String,
    pub provider: Provider,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub is_default: bool,
    pub is_active: bool,
    pub has_api_key: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) api_key_encrypted: String,
}

impl AiSettings {
    /// Decrypt the stored API key. Only called when building a generator.
    pub fn decrypt_api_key(&self, secrets: &crate::SecretBox) -> Result<String, StoryflowError> {
        if self.api_key_encrypted.is_empty() {
            return Ok(String::new());
        }
        secrets.decrypt(&self.api_key_encrypted)
    }

    /// Parameters used when a request carries no overrides.
    #[must_use]
    pub fn base_params(&self) -> GenerationParams {
        GenerationParams {
            model: self.model.clone(),
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
        }
    }
}

/// Per-stage instruction template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemPrompt {
    pub stage: StageType,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Effective parameters of one generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
}

impl GenerationParams {
    /// Apply per-request overrides.
    #[must_use]
    pub fn with_overrides(mut self, temperature: Option<f64>, max_tokens: Option<u32>) -> Self {
        if let Some(t) = temperature {
            self.temperature = t;
        }
        if let Some(m) = max_tokens {
            self.max_tokens = m;
        }
        self
    }

    /// Metadata recorded on the stage and its ai version.
    #[must_use]
    pub fn to_metadata(&self) -> Metadata {
        let mut meta = Metadata::new();
        meta.insert(
            "temperature".to_string(),
            serde_json::json!(self.temperature),
        );
        meta.insert("top_p".to_string(), serde_json::json!(self.top_p));
        meta.insert("max_tokens".to_string(), serde_json::json!(self.max_tokens));
        meta
    }

    /// Validate override ranges.
    pub fn validate_overrides(
        temperature: Option<f64>,
        max_tokens: Option<u32>,
    ) -> Result<(), StoryflowError> {
        if let Some(t) = temperature {
            validate_temperature(t)?;
        }
        if let Some(m) = max_tokens {
            validate_max_tokens(m)?;
        }
        Ok(())
    }
}

/// Result of a generation, ready to be recorded on a stage.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRecord {
    pub content: String,
    pub model: String,
    pub params: Metadata,
}

// =============================================================================
// PAGINATION
// =============================================================================

/// Listing filter for projects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectQuery {
    pub page: u32,
    pub page_size: u32,
    pub search: Option<String>,
}

impl Default for ProjectQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
            search: None,
        }
    }
}

impl ProjectQuery {
    pub fn validate(&self) -> Result<(), StoryflowError> {
        if self.page == 0 {
            return Err(StoryflowError::ValidationError(
                "page must be at least 1".to_string(),
            ));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(StoryflowError::ValidationError(format!(
                "page_size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        Ok(())
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
}

impl<T> Page<T> {
    #[must_use]
    pub fn new(items: Vec<T>, total: u64, page: u32, page_size: u32) -> Self {
        let total_pages = total.div_ceil(u64::from(page_size.max(1)));
        Self {
            items,
            total,
            page,
            page_size,
            total_pages,
        }
    }
}

// =============================================================================
// MUTATION INPUTS
// =============================================================================

/// Input for creating a project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewProject {
    pub name: String,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
}

impl NewProject {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), StoryflowError> {
        validate_project_name(&self.name)?;
        validate_max_len("description", &self.description, MAX_DESCRIPTION_LENGTH)?;
        validate_max_len("category", &self.category, MAX_CATEGORY_LENGTH)?;
        validate_tags(&self.tags)
    }
}

/// Partial update of a project. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl ProjectUpdate {
    pub fn validate(&self) -> Result<(), StoryflowError> {
        if let Some(name) = &self.name {
            validate_project_name(name)?;
        }
        if let Some(description) = &self.description {
            validate_max_len("description", description, MAX_DESCRIPTION_LENGTH)?;
        }
        if let Some(category) = &self.category {
            validate_max_len("category", category, MAX_CATEGORY_LENGTH)?;
        }
        if let Some(tags) = &self.tags {
            validate_tags(tags)?;
        }
        Ok(())
    }
}

/// A manual edit of stage content, optionally forcing a status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageEdit {
    pub content: String,
    #[serde(default)]
    pub status: Option<StageStatus>,
}

impl StageEdit {
    #[must_use]
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            status: None,
        }
    }

    pub fn validate(&self) -> Result<(), StoryflowError> {
        validate_content(&self.content)
    }
}

/// Input for creating generation settings. `api_key` is plain text here and
/// encrypted before it reaches the database. It may be empty for local
/// endpoints that need no key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NewSettings {
    pub name: String,
    pub provider: Provider,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    pub is_default: bool,
    pub api_key: String,
}

impl Default for NewSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            provider: Provider::OpenAi,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4".to_string(),
            temperature: 0.7,
            top_p: 1.0,
            max_tokens: 4096,
            is_default: false,
            api_key: String::new(),
        }
    }
}

impl NewSettings {
    pub fn validate(&self) -> Result<(), StoryflowError> {
        validate_settings_name(&self.name)?;
        validate_base_url(&self.base_url)?;
        validate_model(&self.model)?;
        validate_temperature(self.temperature)?;
        validate_top_p(self.top_p)?;
        validate_max_tokens(self.max_tokens)
    }
}

/// Partial update of generation settings. An empty `api_key` keeps the stored key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsUpdate {
    pub name: Option<String>,
    pub provider: Option<Provider>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u32>,
    pub is_default: Option<bool>,
    pub is_active: Option<bool>,
}

impl SettingsUpdate {
    pub fn validate(&self) -> Result<(), StoryflowError> {
        if let Some(name) = &self.name {
            validate_settings_name(name)?;
        }
        if let Some(url) = &self.base_url {
            validate_base_url(url)?;
        }
        if let Some(model) = &self.model {
            validate_model(model)?;
        }
        if let Some(t) = self.temperature {
            validate_temperature(t)?;
        }
        if let Some(p) = self.top_p {
            validate_top_p(p)?;
        }
        if let Some(m) = self.max_tokens {
            validate_max_tokens(m)?;
        }
        Ok(())
    }
}

// =============================================================================
// FIELD VALIDATION
// =============================================================================

fn validate_max_len(field: &str, value: &str, max: usize) -> Result<(), StoryflowError> {
    let len = value.chars().count();
    if len > max {
        return Err(StoryflowError::ValidationError(format!(
            "{} length {} exceeds maximum {} characters",
            field, len, max
        )));
    }
    Ok(())
}

fn validate_required(field: &str, value: &str, max: usize) -> Result<(), StoryflowError> {
    if value.trim().is_empty() {
        return Err(StoryflowError::ValidationError(format!(
            "{} must not be empty",
            field
        )));
    }
    validate_max_len(field, value, max)
}

fn validate_project_name(name: &str) -> Result<(), StoryflowError> {
    validate_required("name", name, MAX_PROJECT_NAME_LENGTH)
}

fn validate_settings_name(name: &str) -> Result<(), StoryflowError> {
    validate_required("name", name, MAX_SETTINGS_NAME_LENGTH)
}

fn validate_model(model: &str) -> Result<(), StoryflowError> {
    validate_required("model", model, MAX_MODEL_LENGTH)
}

fn validate_tags(tags: &[String]) -> Result<(), StoryflowError> {
    if tags.len() > MAX_TAG_COUNT {
        return Err(StoryflowError::ValidationError(format!(
            "At most {} tags are allowed",
            MAX_TAG_COUNT
        )));
    }
    for tag in tags {
        validate_required("tag", tag, MAX_TAG_LENGTH)?;
    }
    Ok(())
}

fn validate_base_url(url: &str) -> Result<(), StoryflowError> {
    validate_required("base_url", url, MAX_BASE_URL_LENGTH)?;
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(StoryflowError::ValidationError(
            "base_url must start with http:// or https://".to_string(),
        ));
    }
    Ok(())
}

fn validate_temperature(t: f64) -> Result<(), StoryflowError> {
    if !(0.0..=MAX_TEMPERATURE).contains(&t) {
        return Err(StoryflowError::ValidationError(format!(
            "temperature must be between 0 and {}",
            MAX_TEMPERATURE
        )));
    }
    Ok(())
}

fn validate_top_p(p: f64) -> Result<(), StoryflowError> {
    if !(0.0..=MAX_TOP_P).contains(&p) {
        return Err(StoryflowError::ValidationError(format!(
            "top_p must be between 0 and {}",
            MAX_TOP_P
        )));
    }
    Ok(())
}

fn validate_max_tokens(m: u32) -> Result<(), StoryflowError> {
    if !(MAX_TOKENS_FLOOR..=MAX_TOKENS_CEILING).contains(&m) {
        return Err(StoryflowError::ValidationError(format!(
            "max_tokens must be between {} and {}",
            MAX_TOKENS_FLOOR, MAX_TOKENS_CEILING
        )));
    }
    Ok(())
}

/// Validate stage content length.
pub fn validate_content(content: &str) -> Result<(), StoryflowError> {
    validate_max_len("content", content, MAX_CONTENT_LENGTH)
}

/// Validate a version label. Empty labels clear the label.
pub fn validate_label(label: &str) -> Result<(), StoryflowError> {
    validate_max_len("label", label, MAX_LABEL_LENGTH)
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Storyflow system.
///
/// - No silent failures
/// - No automatic retries: every error reaches the caller
/// - Validation happens before any mutation
#[derive(Debug, Error)]
pub enum StoryflowError {
    /// A project, stage, version or settings row does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Generation cannot run: no settings exist, or the service is misconfigured.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The generator endpoint failed, timed out or answered with garbage.
    #[error("Upstream error: {message}")]
    UpstreamError {
        /// HTTP status returned by the endpoint, if one was received.
        status: Option<u16>,
        message: String,
    },

    /// Input rejected before any mutation.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// The relational store failed.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl StoryflowError {
    /// Shorthand for a `NotFound` naming the entity and its key.
    pub fn not_found(entity: &str, key: impl fmt::Display) -> Self {
        Self::NotFound(format!("{} {}", entity, key))
    }

    /// Shorthand for an `UpstreamError`.
    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::UpstreamError {
            status,
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for StoryflowError {
    fn from(e: rusqlite::Error) -> Self {
        Self::StorageError(e.to_string())
    }
}

impl From<serde_json::Error> for StoryflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<std::io::Error> for StoryflowError {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            StageStatus::Locked,
            StageStatus::Unlocked,
            StageStatus::InProgress,
            StageStatus::Completed,
        ] {
            assert_eq!(status.as_str().parse::<StageStatus>().ok(), Some(status));
        }
        assert!("archived".parse::<StageStatus>().is_err());
    }

    #[test]
    fn new_project_requires_a_name() {
        assert!(NewProject::named("  ").validate().is_err());
        assert!(NewProject::named("Night Train").validate().is_ok());
    }

    #[test]
    fn new_project_rejects_oversized_description() {
        let project = NewProject {
            description: "x".repeat(MAX_DESCRIPTION_LENGTH + 1),
            ..NewProject::named("p")
        };
        assert!(matches!(
            project.validate(),
            Err(StoryflowError::ValidationError(_))
        ));
    }

    #[test]
    fn stage_edit_rejects_oversized_content() {
        let edit = StageEdit::content("a".repeat(MAX_CONTENT_LENGTH + 1));
        assert!(edit.validate().is_err());
        assert!(StageEdit::content("a".repeat(MAX_CONTENT_LENGTH)).validate().is_ok());
    }

    #[test]
    fn settings_ranges_are_enforced() {
        let ok = NewSettings {
            name: "main".to_string(),
            api_key: "sk-test".to_string(),
            ..NewSettings::default()
        };
        assert!(ok.validate().is_ok());

        let hot = NewSettings {
            temperature: 2.5,
            ..ok.clone()
        };
        assert!(hot.validate().is_err());

        let tiny = NewSettings {
            max_tokens: 10,
            ..ok.clone()
        };
        assert!(tiny.validate().is_err());

        let ftp = NewSettings {
            base_url: "ftp://example.com".to_string(),
            ..ok
        };
        assert!(ftp.validate().is_err());
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let base = GenerationParams {
            model: "gpt-4".to_string(),
            temperature: 0.7,
            top_p: 1.0,
            max_tokens: 4096,
        };
        let p = base.clone().with_overrides(Some(0.2), None);
        assert_eq!(p.max_tokens, 4096);
        assert!(p.temperature < 0.3);
        assert_eq!(p.to_metadata().len(), 3);
    }

    #[test]
    fn page_counts_partial_pages() {
        let page: Page<u8> = Page::new(vec![], 41, 1, 20);
        assert_eq!(page.total_pages, 3);
        let empty: Page<u8> = Page::new(vec![], 0, 1, 20);
        assert_eq!(empty.total_pages, 0);
    }

    #[test]
    fn provider_parses_known_names_only() {
        assert_eq!("openai".parse::<Provider>().ok(), Some(Provider::OpenAi));
        assert_eq!("custom".parse::<Provider>().ok(), Some(Provider::Custom));
        assert!("claude".parse::<Provider>().is_err());
    }
}
