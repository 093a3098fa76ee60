//! # Project Archive
//!
//! A binary snapshot of one project (stages, statuses, full version history)
//! that can be imported back as a new project.
//!
//! Format:
//! ```text
//! [header_len: u32 LE] [ArchiveHeader (postcard)] [ProjectArchive (postcard)]
//! ```
//!
//! The header carries a BLAKE3 hash of the data section; any flipped byte
//! fails the import. Version numbers and the per-stage high-water counter
//! survive the round trip, so imported stages never reuse a number either.

use crate::primitives::{FORMAT_VERSION, MAGIC_BYTES};
use crate::registry::StageType;
use crate::storage::{ProjectDao, StageDao, Store, VersionDao, now_millis};
use crate::types::{
    Metadata, NewProject, ProjectDetail, ProjectId, StageStatus, StageVersion, VersionId,
    VersionSource, validate_content,
};
use crate::StoryflowError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of versions accepted from one archive.
pub const MAX_IMPORT_VERSIONS: u64 = 100_000;

/// Header of an archive file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub magic: [u8; 4],
    pub version: u8,
    pub stage_count: u32,
    pub version_count: u64,
    /// BLAKE3 hash of the data section.
    pub hash: [u8; 32],
}

impl ArchiveHeader {
    /// Error messages are deliberately generic.
    pub fn validate(&self) -> Result<(), StoryflowError> {
        if &self.magic != MAGIC_BYTES {
            return Err(StoryflowError::SerializationError(
                "Invalid file format".to_string(),
            ));
        }
        if self.version != FORMAT_VERSION {
            return Err(StoryflowError::SerializationError(
                "Unsupported file version".to_string(),
            ));
        }
        if self.version_count > MAX_IMPORT_VERSIONS {
            return Err(StoryflowError::SerializationError(format!(
                "Version count {} exceeds maximum allowed {}",
                self.version_count, MAX_IMPORT_VERSIONS
            )));
        }
        Ok(())
    }
}

/// A version as stored in an archive. Parameters travel as JSON text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchivedVersion {
    pub version_number: i64,
    pub content: String,
    pub source: VersionSource,
    pub ai_model: Option<String>,
    pub ai_params: Option<String>,
    pub label: Option<String>,
    pub created_at: i64,
}

/// A stage as stored in an archive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchivedStage {
    pub stage_type: StageType,
    pub status: StageStatus,
    pub content: String,
    pub last_ai_model: Option<String>,
    pub last_ai_params: Option<String>,
    /// Highest version number ever issued for the stage.
    pub version_counter: i64,
    pub versions: Vec<ArchivedVersion>,
}

/// The data section of an archive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectArchive {
    pub name: String,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
    pub created_at: i64,
    pub exported_at: i64,
    pub stages: Vec<ArchivedStage>,
}

impl ProjectArchive {
    fn version_count(&self) -> u64 {
        self.stages.iter().map(|s| s.versions.len() as u64).sum()
    }
}

fn params_to_json(params: Option<&Metadata>) -> Result<Option<String>, StoryflowError> {
    Ok(params.map(serde_json::to_string).transpose()?)
}

fn params_from_json(json: Option<&str>) -> Result<Option<Metadata>, StoryflowError> {
    Ok(json.map(serde_json::from_str).transpose()?)
}

/// Serialize an archive: `[header_len][header][data]`.
pub fn encode_archive(archive: &ProjectArchive) -> Result<Vec<u8>, StoryflowError> {
    let data = postcard::to_allocvec(archive)
        .map_err(|e| StoryflowError::SerializationError(format!("Data: {}", e)))?;
    let header = ArchiveHeader {
        magic: *MAGIC_BYTES,
        version: FORMAT_VERSION,
        stage_count: archive.stages.len() as u32,
        version_count: archive.version_count(),
        hash: *blake3::hash(&data).as_bytes(),
    };
    let header_bytes = postcard::to_allocvec(&header)
        .map_err(|e| StoryflowError::SerializationError(format!("Header: {}", e)))?;

    let mut out = Vec::with_capacity(4 + header_bytes.len() + data.len());
    out.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(&data);
    Ok(out)
}

/// Parse and verify an archive.
pub fn decode_archive(bytes: &[u8]) -> Result<ProjectArchive, StoryflowError> {
    let (len_bytes, rest) = bytes
        .split_first_chunk::<4>()
        .ok_or_else(|| StoryflowError::SerializationError("Data too short".to_string()))?;
    let header_len = u32::from_le_bytes(*len_bytes) as usize;
    if rest.len() < header_len {
        return Err(StoryflowError::SerializationError(
            "Data too short for header".to_string(),
        ));
    }
    let (header_bytes, data) = rest.split_at(header_len);

    let header: ArchiveHeader = postcard::from_bytes(header_bytes)
        .map_err(|e| StoryflowError::SerializationError(format!("Header: {}", e)))?;
    header.validate()?;

    if blake3::hash(data) != blake3::Hash::from(header.hash) {
        return Err(StoryflowError::SerializationError(
            "Checksum mismatch".to_string(),
        ));
    }

    let archive: ProjectArchive = postcard::from_bytes(data)
        .map_err(|e| StoryflowError::SerializationError(format!("Data: {}", e)))?;

    if archive.stages.len() as u32 != header.stage_count
        || archive.version_count() != header.version_count
    {
        return Err(StoryflowError::SerializationError(
            "Count mismatch".to_string(),
        ));
    }
    Ok(archive)
}

impl Store {
    /// Snapshot a live project.
    pub fn export_archive(
        &self,
        project_id: ProjectId,
        exported_at: DateTime<Utc>,
    ) -> Result<ProjectArchive, StoryflowError> {
        let detail = self.get_project(project_id)?;
        let mut stages = Vec::with_capacity(detail.stages.len());
        for stage in &detail.stages {
            let versions = VersionDao::list(self.conn(), stage.id)?
                .into_iter()
                .rev()
                .map(|v| {
                    Ok(ArchivedVersion {
                        version_number: v.version_number,
                        ai_params: params_to_json(v.ai_params.as_ref())?,
                        content: v.content,
                        source: v.source,
                        ai_model: v.ai_model,
                        label: v.label,
                        created_at: v.created_at.timestamp_millis(),
                    })
                })
                .collect::<Result<Vec<_>, StoryflowError>>()?;
            stages.push(ArchivedStage {
                stage_type: stage.stage_type,
                status: stage.status,
                content: stage.content.clone(),
                last_ai_model: stage.last_ai_model.clone(),
                last_ai_params: params_to_json(stage.last_ai_params.as_ref())?,
                version_counter: VersionDao::next_number(self.conn(), stage.id)? - 1,
                versions,
            });
        }

        Ok(ProjectArchive {
            name: detail.project.name,
            description: detail.project.description,
            category: detail.project.category,
            tags: detail.project.tags,
            created_at: detail.project.created_at.timestamp_millis(),
            exported_at: exported_at.timestamp_millis(),
            stages,
        })
    }

    /// Create a new project from an archive. All or nothing.
    pub fn import_archive(
        &mut self,
        archive: &ProjectArchive,
    ) -> Result<ProjectDetail, StoryflowError> {
        let input = NewProject {
            name: archive.name.clone(),
            description: archive.description.clone(),
            category: archive.category.clone(),
            tags: archive.tags.clone(),
        };
        input.validate()?;
        for stage in &archive.stages {
            validate_content(&stage.content)?;
            params_from_json(stage.last_ai_params.as_deref())?;
        }

        let id = self.write(|tx| {
            let now = now_millis();
            let id = ProjectDao::insert(tx, &input, now)?;
            for archived in &archive.stages {
                let stage = StageDao::require(tx, id, archived.stage_type)?;
                StageDao::overwrite(
                    tx,
                    stage.id,
                    &archived.content,
                    archived.status,
                    archived.last_ai_model.as_deref(),
                    archived.last_ai_params.as_deref(),
                    now,
                )?;
                for v in &archived.versions {
                    let version = StageVersion {
                        id: VersionId(0),
                        stage_id: stage.id,
                        version_number: v.version_number,
                        content: v.content.clone(),
                        source: v.source,
                        ai_model: v.ai_model.clone(),
                        ai_params: params_from_json(v.ai_params.as_deref())?,
                        label: v.label.clone(),
                        created_at: DateTime::from_timestamp_millis(v.created_at)
                            .unwrap_or_default(),
                    };
                    VersionDao::insert_numbered(tx, stage.id, &version)?;
                }
                StageDao::raise_counter(tx, stage.id, archived.version_counter)?;
            }
            Ok(id)
        })?;
        self.get_project(id)
    }
}
