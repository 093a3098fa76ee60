//! # storyflow-core
//!
//! The workflow engine for Storyflow - THE LOGIC.
//!
//! A project moves through eight fixed stages
//! (`idea → story → script → character → scene → storyboard → image_prompt → motion_prompt`).
//! This crate owns:
//! - the stage registry and its declared dependencies (`registry`)
//! - the per-stage status machine and unlock propagation (`workflow`)
//! - the append-only version log with never-reused numbers (`storage`)
//! - prompt context assembly and template rendering (`context`, `prompt`)
//! - settings secrets, text exports and the binary project archive
//!
//! ## Architectural Constraints
//!
//! - Has NO async, NO network dependencies
//! - Every mutation validates first, then runs in one `BEGIN IMMEDIATE` transaction
//! - Reports partial failures as data; logging belongs to the app layer

// =============================================================================
// MODULES
// =============================================================================

pub mod context;
pub mod export;
pub mod primitives;
pub mod prompt;
pub mod registry;
pub mod secrets;
pub mod storage;
pub mod types;
pub mod workflow;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    AiSettings, GenerationParams, GenerationRecord, Metadata, NewProject, NewSettings, Page,
    Project, ProjectDetail, ProjectId, ProjectQuery, ProjectUpdate, Provider, SettingsId,
    SettingsUpdate, Stage, StageEdit, StageId, StageStatus, StageVersion, StoryflowError,
    SystemPrompt, VersionId, VersionSource,
};

// =============================================================================
// RE-EXPORTS: Workflow Engine
// =============================================================================

pub use context::{ContextMap, StageContext, assemble, stage_context};
pub use export::archive::{ProjectArchive, decode_archive, encode_archive};
pub use export::{BundleReport, ExportFile, ExportKind, SkippedEntry};
pub use prompt::{default_template, render};
pub use registry::{STAGE_ORDER, StageType};
pub use secrets::SecretBox;
pub use storage::Store;
