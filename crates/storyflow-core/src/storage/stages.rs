//! Stages and their version log.
//!
//! Version numbers are per stage, start at 1 and are never reused. The next
//! number is `1 + max(existing max, version_counter)` where `version_counter`
//! is a high-water mark persisted on the stage row, so deleting the newest
//! version does not free its number. Numbering and insert always happen in
//! the caller's `BEGIN IMMEDIATE` transaction; `UNIQUE(stage_id,
//! version_number)` rejects anything that slips past.

use super::{ProjectDao, Store, json_column, now_millis, parsed_column, to_datetime};
use crate::StoryflowError;
use crate::registry::StageType;
use crate::types::{
    Metadata, ProjectId, Stage, StageId, StageStatus, StageVersion, VersionId, VersionSource,
    validate_label,
};
use rusqlite::{Connection, OptionalExtension, Row, params};

const STAGE_COLUMNS: &str = "id, project_id, stage_type, status, content, last_ai_model, \
     last_ai_params, created_at, updated_at";

const VERSION_COLUMNS: &str =
    "id, stage_id, version_number, content, source, ai_model, ai_params, label, created_at";

// =============================================================================
// STAGES
// =============================================================================

/// Data access for the `stages` table.
pub(crate) struct StageDao;

impl StageDao {
    pub(crate) fn insert(
        conn: &Connection,
        project_id: ProjectId,
        stage_type: StageType,
        status: StageStatus,
        now: i64,
    ) -> Result<StageId, StoryflowError> {
        conn.execute(
            "INSERT INTO stages (project_id, stage_type, position, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                project_id.0,
                stage_type.as_str(),
                stage_type.position() as i64,
                status.as_str(),
                now
            ],
        )?;
        Ok(StageId(conn.last_insert_rowid()))
    }

    pub(crate) fn list_for_project(
        conn: &Connection,
        project_id: ProjectId,
    ) -> Result<Vec<Stage>, StoryflowError> {
        let sql = format!(
            "SELECT {} FROM stages WHERE project_id = ?1 ORDER BY position",
            STAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let stages = stmt
            .query_map([project_id.0], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(stages)
    }

    pub(crate) fn get(
        conn: &Connection,
        project_id: ProjectId,
        stage_type: StageType,
    ) -> Result<Option<Stage>, StoryflowError> {
        let sql = format!(
            "SELECT {} FROM stages WHERE project_id = ?1 AND stage_type = ?2",
            STAGE_COLUMNS
        );
        Ok(conn
            .query_row(
                &sql,
                params![project_id.0, stage_type.as_str()],
                Self::map_row,
            )
            .optional()?)
    }

    /// The stage of a live project, or `NotFound` for either.
    pub(crate) fn require(
        conn: &Connection,
        project_id: ProjectId,
        stage_type: StageType,
    ) -> Result<Stage, StoryflowError> {
        ProjectDao::require(conn, project_id)?;
        Self::get(conn, project_id, stage_type)?.ok_or_else(|| {
            StoryflowError::NotFound(format!("Stage {} of project {}", stage_type, project_id))
        })
    }

    pub(crate) fn update_content(
        conn: &Connection,
        id: StageId,
        content: &str,
        status: StageStatus,
        now: i64,
    ) -> Result<(), StoryflowError> {
        conn.execute(
            "UPDATE stages SET content = ?1, status = ?2, updated_at = ?3 WHERE id = ?4",
            params![content, status.as_str(), now, id.0],
        )?;
        Ok(())
    }

    pub(crate) fn update_status(
        conn: &Connection,
        id: StageId,
        status: StageStatus,
        now: i64,
    ) -> Result<(), StoryflowError> {
        conn.execute(
            "UPDATE stages SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), now, id.0],
        )?;
        Ok(())
    }

    pub(crate) fn update_generation(
        conn: &Connection,
        id: StageId,
        content: &str,
        model: &str,
        params_json: &str,
        now: i64,
    ) -> Result<(), StoryflowError> {
        conn.execute(
            "UPDATE stages SET content = ?1, status = ?2, last_ai_model = ?3,
                    last_ai_params = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                content,
                StageStatus::InProgress.as_str(),
                model,
                params_json,
                now,
                id.0
            ],
        )?;
        Ok(())
    }

    /// Replace every mutable column at once (archive import).
    pub(crate) fn overwrite(
        conn: &Connection,
        id: StageId,
        content: &str,
        status: StageStatus,
        model: Option<&str>,
        params_json: Option<&str>,
        now: i64,
    ) -> Result<(), StoryflowError> {
        conn.execute(
            "UPDATE stages SET content = ?1, status = ?2, last_ai_model = ?3,
                    last_ai_params = ?4, updated_at = ?5
             WHERE id = ?6",
            params![content, status.as_str(), model, params_json, now, id.0],
        )?;
        Ok(())
    }

    /// Raise the high-water mark to at least `number`.
    pub(crate) fn raise_counter(
        conn: &Connection,
        id: StageId,
        number: i64,
    ) -> Result<(), StoryflowError> {
        conn.execute(
            "UPDATE stages SET version_counter = MAX(version_counter, ?1) WHERE id = ?2",
            params![number, id.0],
        )?;
        Ok(())
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<Stage> {
        Ok(Stage {
            id: StageId(row.get(0)?),
            project_id: ProjectId(row.get(1)?),
            stage_type: parsed_column(row, 2)?,
            status: parsed_column(row, 3)?,
            content: row.get(4)?,
            last_ai_model: row.get(5)?,
            last_ai_params: json_column(row, 6)?,
            created_at: to_datetime(row.get(7)?),
            updated_at: to_datetime(row.get(8)?),
        })
    }
}

// =============================================================================
// VERSIONS
// =============================================================================

/// A version about to be appended.
pub(crate) struct VersionDraft<'a> {
    pub content: &'a str,
    pub source: VersionSource,
    pub ai_model: Option<&'a str>,
    pub ai_params: Option<&'a Metadata>,
}

impl<'a> VersionDraft<'a> {
    pub(crate) fn plain(content: &'a str, source: VersionSource) -> Self {
        Self {
            content,
            source,
            ai_model: None,
            ai_params: None,
        }
    }
}

/// Data access for the `stage_versions` table.
pub(crate) struct VersionDao;

impl VersionDao {
    /// The number the next appended version of `stage_id` will receive.
    pub(crate) fn next_number(
        conn: &Connection,
        stage_id: StageId,
    ) -> Result<i64, StoryflowError> {
        let current: Option<i64> = conn
            .query_row(
                "SELECT MAX(version_counter,
                            COALESCE((SELECT MAX(version_number) FROM stage_versions
                                      WHERE stage_id = ?1), 0))
                 FROM stages WHERE id = ?1",
                [stage_id.0],
                |row| row.get(0),
            )
            .optional()?;
        let current = current.ok_or_else(|| StoryflowError::not_found("Stage", stage_id))?;
        Ok(current + 1)
    }

    /// Append a version with the next number and raise the stage counter.
    pub(crate) fn append(
        conn: &Connection,
        stage_id: StageId,
        draft: &VersionDraft<'_>,
        now: i64,
    ) -> Result<StageVersion, StoryflowError> {
        let number = Self::next_number(conn, stage_id)?;
        let params_json = draft.ai_params.map(serde_json::to_string).transpose()?;
        conn.execute(
            "INSERT INTO stage_versions
                (stage_id, version_number, content, source, ai_model, ai_params, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                stage_id.0,
                number,
                draft.content,
                draft.source.as_str(),
                draft.ai_model,
                params_json,
                now
            ],
        )?;
        let id = VersionId(conn.last_insert_rowid());
        StageDao::raise_counter(conn, stage_id, number)?;

        Ok(StageVersion {
            id,
            stage_id,
            version_number: number,
            content: draft.content.to_string(),
            source: draft.source,
            ai_model: draft.ai_model.map(str::to_string),
            ai_params: draft.ai_params.cloned(),
            label: None,
            created_at: to_datetime(now),
        })
    }

    /// Insert a version with an explicit number (archive import).
    pub(crate) fn insert_numbered(
        conn: &Connection,
        stage_id: StageId,
        version: &StageVersion,
    ) -> Result<VersionId, StoryflowError> {
        let params_json = version
            .ai_params
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            "INSERT INTO stage_versions
                (stage_id, version_number, content, source, ai_model, ai_params, label, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                stage_id.0,
                version.version_number,
                version.content,
                version.source.as_str(),
                version.ai_model,
                params_json,
                version.label,
                version.created_at.timestamp_millis()
            ],
        )?;
        StageDao::raise_counter(conn, stage_id, version.version_number)?;
        Ok(VersionId(conn.last_insert_rowid()))
    }

    pub(crate) fn list(
        conn: &Connection,
        stage_id: StageId,
    ) -> Result<Vec<StageVersion>, StoryflowError> {
        let sql = format!(
            "SELECT {} FROM stage_versions WHERE stage_id = ?1 ORDER BY version_number DESC",
            VERSION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let versions = stmt
            .query_map([stage_id.0], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(versions)
    }

    /// A version scoped to its stage: another stage's version is `NotFound`.
    pub(crate) fn require(
        conn: &Connection,
        stage_id: StageId,
        id: VersionId,
    ) -> Result<StageVersion, StoryflowError> {
        let sql = format!(
            "SELECT {} FROM stage_versions WHERE id = ?1 AND stage_id = ?2",
            VERSION_COLUMNS
        );
        conn.query_row(&sql, params![id.0, stage_id.0], Self::map_row)
            .optional()?
            .ok_or_else(|| StoryflowError::not_found("Version", id))
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<StageVersion> {
        Ok(StageVersion {
            id: VersionId(row.get(0)?),
            stage_id: StageId(row.get(1)?),
            version_number: row.get(2)?,
            content: row.get(3)?,
            source: parsed_column(row, 4)?,
            ai_model: row.get(5)?,
            ai_params: json_column(row, 6)?,
            label: row.get(7)?,
            created_at: to_datetime(row.get(8)?),
        })
    }
}

// =============================================================================
// STORE API
// =============================================================================

impl Store {
    /// The eight stages of a live project in pipeline order.
    pub fn list_stages(&self, project_id: ProjectId) -> Result<Vec<Stage>, StoryflowError> {
        ProjectDao::require(self.conn(), project_id)?;
        StageDao::list_for_project(self.conn(), project_id)
    }

    pub fn get_stage(
        &self,
        project_id: ProjectId,
        stage_type: StageType,
    ) -> Result<Stage, StoryflowError> {
        StageDao::require(self.conn(), project_id, stage_type)
    }

    /// Version history of a stage, newest first.
    pub fn list_versions(
        &self,
        project_id: ProjectId,
        stage_type: StageType,
    ) -> Result<Vec<StageVersion>, StoryflowError> {
        let stage = StageDao::require(self.conn(), project_id, stage_type)?;
        VersionDao::list(self.conn(), stage.id)
    }

    pub fn get_version(
        &self,
        project_id: ProjectId,
        stage_type: StageType,
        version_id: VersionId,
    ) -> Result<StageVersion, StoryflowError> {
        let stage = StageDao::require(self.conn(), project_id, stage_type)?;
        VersionDao::require(self.conn(), stage.id, version_id)
    }

    /// The number the next version of this stage will receive.
    pub fn next_version_number(
        &self,
        project_id: ProjectId,
        stage_type: StageType,
    ) -> Result<i64, StoryflowError> {
        let stage = StageDao::require(self.conn(), project_id, stage_type)?;
        VersionDao::next_number(self.conn(), stage.id)
    }

    /// Set or clear (`None` or empty) a version's label. The only mutable field.
    pub fn rename_version(
        &mut self,
        project_id: ProjectId,
        stage_type: StageType,
        version_id: VersionId,
        label: Option<&str>,
    ) -> Result<StageVersion, StoryflowError> {
        let label = label.map(str::trim).filter(|l| !l.is_empty());
        if let Some(label) = label {
            validate_label(label)?;
        }
        self.write(|tx| {
            let stage = StageDao::require(tx, project_id, stage_type)?;
            VersionDao::require(tx, stage.id, version_id)?;
            tx.execute(
                "UPDATE stage_versions SET label = ?1 WHERE id = ?2",
                params![label, version_id.0],
            )?;
            VersionDao::require(tx, stage.id, version_id)
        })
    }

    /// Delete one version. Siblings keep their numbers; the counter is untouched.
    pub fn delete_version(
        &mut self,
        project_id: ProjectId,
        stage_type: StageType,
        version_id: VersionId,
    ) -> Result<(), StoryflowError> {
        self.write(|tx| {
            let stage = StageDao::require(tx, project_id, stage_type)?;
            VersionDao::require(tx, stage.id, version_id)?;
            tx.execute("DELETE FROM stage_versions WHERE id = ?1", [version_id.0])?;
            ProjectDao::touch(tx, project_id, now_millis())
        })
    }
}
