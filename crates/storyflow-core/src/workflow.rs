//! # Stage State Machine
//!
//! Content mutations of a stage and the status transitions they drive.
//!
//! | Operation | Version appended | Status after |
//! |-----------|------------------|--------------|
//! | [`Store::set_content`] | `manual` snapshot of the *old* content, only if it changed | override, else UNLOCKED when empty, else IN_PROGRESS |
//! | [`Store::record_generation`] | `ai` snapshot of the *new* content | IN_PROGRESS |
//! | [`Store::restore_version`] | `restore` snapshot of the pre-restore content | unchanged |
//! | [`Store::complete_stage`] | none | COMPLETED |
//!
//! Whenever a stage ends up with non-empty content through an edit or a
//! generation, its successor moves LOCKED -> UNLOCKED. Every operation runs in
//! one `BEGIN IMMEDIATE` transaction.

use crate::StoryflowError;
use crate::registry::StageType;
use crate::storage::{ProjectDao, StageDao, Store, VersionDao, VersionDraft, now_millis};
use crate::types::{
    GenerationRecord, ProjectId, Stage, StageEdit, StageStatus, StageVersion, VersionId,
    VersionSource, validate_content,
};
use rusqlite::Connection;

/// Status a stage takes after a manual edit.
#[must_use]
pub fn status_after_edit(content: &str, requested: Option<StageStatus>) -> StageStatus {
    match requested {
        Some(status) => status,
        None if content.is_empty() => StageStatus::Unlocked,
        None => StageStatus::InProgress,
    }
}

/// Whether unlock propagation changes a successor in `status`.
#[must_use]
pub fn unlocks(status: StageStatus) -> bool {
    status == StageStatus::Locked
}

/// Unlock the successor of `stage_type` if it is exactly LOCKED.
fn unlock_successor(
    conn: &Connection,
    project_id: ProjectId,
    stage_type: StageType,
    now: i64,
) -> Result<Option<Stage>, StoryflowError> {
    let Some(next) = stage_type.next() else {
        return Ok(None);
    };
    let successor = StageDao::require(conn, project_id, next)?;
    if !unlocks(successor.status) {
        return Ok(None);
    }
    StageDao::update_status(conn, successor.id, StageStatus::Unlocked, now)?;
    Ok(Some(StageDao::require(conn, project_id, next)?))
}

impl Store {
    /// Manually replace a stage's content.
    pub fn set_content(
        &mut self,
        project_id: ProjectId,
        stage_type: StageType,
        edit: &StageEdit,
    ) -> Result<Stage, StoryflowError> {
        edit.validate()?;
        self.write(|tx| {
            let stage = StageDao::require(tx, project_id, stage_type)?;
            let now = now_millis();

            if stage.content != edit.content {
                VersionDao::append(
                    tx,
                    stage.id,
                    &VersionDraft::plain(&stage.content, VersionSource::Manual),
                    now,
                )?;
            }

            let status = status_after_edit(&edit.content, edit.status);
            StageDao::update_content(tx, stage.id, &edit.content, status, now)?;
            if !edit.content.is_empty() {
                unlock_successor(tx, project_id, stage_type, now)?;
            }
            ProjectDao::touch(tx, project_id, now)?;
            StageDao::require(tx, project_id, stage_type)
        })
    }

    /// Persist generated content: an `ai` version of the new content, the
    /// stage content and metadata, status IN_PROGRESS, then unlock propagation.
    pub fn record_generation(
        &mut self,
        project_id: ProjectId,
        stage_type: StageType,
        record: &GenerationRecord,
    ) -> Result<(Stage, StageVersion), StoryflowError> {
        validate_content(&record.content)?;
        let params_json = serde_json::to_string(&record.params)?;
        self.write(|tx| {
            let stage = StageDao::require(tx, project_id, stage_type)?;
            let now = now_millis();

            let version = VersionDao::append(
                tx,
                stage.id,
                &VersionDraft {
                    content: &record.content,
                    source: VersionSource::Ai,
                    ai_model: Some(&record.model),
                    ai_params: Some(&record.params),
                },
                now,
            )?;
            StageDao::update_generation(
                tx,
                stage.id,
                &record.content,
                &record.model,
                &params_json,
                now,
            )?;
            if !record.content.is_empty() {
                unlock_successor(tx, project_id, stage_type, now)?;
            }
            ProjectDao::touch(tx, project_id, now)?;
            Ok((StageDao::require(tx, project_id, stage_type)?, version))
        })
    }

    /// Copy a previous version's content back into the stage.
    ///
    /// The content being replaced is saved first as a `restore` version.
    /// Status is left as it was.
    pub fn restore_version(
        &mut self,
        project_id: ProjectId,
        stage_type: StageType,
        version_id: VersionId,
    ) -> Result<Stage, StoryflowError> {
        self.write(|tx| {
            let stage = StageDao::require(tx, project_id, stage_type)?;
            let target = VersionDao::require(tx, stage.id, version_id)?;
            let now = now_millis();

            VersionDao::append(
                tx,
                stage.id,
                &VersionDraft::plain(&stage.content, VersionSource::Restore),
                now,
            )?;
            StageDao::update_content(tx, stage.id, &target.content, stage.status, now)?;
            ProjectDao::touch(tx, project_id, now)?;
            StageDao::require(tx, project_id, stage_type)
        })
    }

    /// Unlock the stage after `stage_type` if it is LOCKED.
    ///
    /// Returns the successor when it changed; `None` on the last stage or when
    /// the successor was already unlocked or beyond.
    pub fn unlock_next(
        &mut self,
        project_id: ProjectId,
        stage_type: StageType,
    ) -> Result<Option<Stage>, StoryflowError> {
        self.write(|tx| {
            StageDao::require(tx, project_id, stage_type)?;
            let now = now_millis();
            let unlocked = unlock_successor(tx, project_id, stage_type, now)?;
            if unlocked.is_some() {
                ProjectDao::touch(tx, project_id, now)?;
            }
            Ok(unlocked)
        })
    }

    /// Mark a stage COMPLETED. Content and versions are untouched.
    pub fn complete_stage(
        &mut self,
        project_id: ProjectId,
        stage_type: StageType,
    ) -> Result<Stage, StoryflowError> {
        self.write(|tx| {
            let stage = StageDao::require(tx, project_id, stage_type)?;
            let now = now_millis();
            StageDao::update_status(tx, stage.id, StageStatus::Completed, now)?;
            ProjectDao::touch(tx, project_id, now)?;
            StageDao::require(tx, project_id, stage_type)
        })
    }
}
