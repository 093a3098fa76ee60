//! Project catalog: creation with the eight seeded stages, lookup, search,
//! pagination, update, soft delete and purge.

use super::{Store, StageDao, now_millis, to_datetime};
use crate::StoryflowError;
use crate::registry::STAGE_ORDER;
use crate::types::{
    NewProject, Page, Project, ProjectDetail, ProjectId, ProjectQuery, ProjectUpdate, StageStatus,
};
use rusqlite::{Connection, OptionalExtension, Row, params};

const PROJECT_COLUMNS: &str =
    "id, name, description, category, tags, is_deleted, deleted_at, created_at, updated_at";

/// Data access for the `projects` table.
pub(crate) struct ProjectDao;

impl ProjectDao {
    /// Insert a project row and its eight stages. Caller provides the transaction.
    pub(crate) fn insert(
        conn: &Connection,
        input: &NewProject,
        now: i64,
    ) -> Result<ProjectId, StoryflowError> {
        let tags = serde_json::to_string(&input.tags)?;
        conn.execute(
            "INSERT INTO projects (name, description, category, tags, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![input.name, input.description, input.category, tags, now],
        )?;
        let id = ProjectId(conn.last_insert_rowid());

        for stage in STAGE_ORDER {
            let status = if stage.is_first() {
                StageStatus::Unlocked
            } else {
                StageStatus::Locked
            };
            StageDao::insert(conn, id, stage, status, now)?;
        }
        Ok(id)
    }

    /// Fetch a live (not soft-deleted) project.
    pub(crate) fn get(
        conn: &Connection,
        id: ProjectId,
    ) -> Result<Option<Project>, StoryflowError> {
        let sql = format!(
            "SELECT {} FROM projects WHERE id = ?1 AND is_deleted = 0",
            PROJECT_COLUMNS
        );
        Ok(conn.query_row(&sql, [id.0], Self::map_row).optional()?)
    }

    /// Fetch a live project or fail with `NotFound`.
    pub(crate) fn require(conn: &Connection, id: ProjectId) -> Result<Project, StoryflowError> {
        Self::get(conn, id)?.ok_or_else(|| StoryflowError::not_found("Project", id))
    }

    /// Bump `updated_at` after a change to one of the project's stages.
    pub(crate) fn touch(conn: &Connection, id: ProjectId, now: i64) -> Result<(), StoryflowError> {
        conn.execute(
            "UPDATE projects SET updated_at = ?1 WHERE id = ?2",
            params![now, id.0],
        )?;
        Ok(())
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<Project> {
        let tags: String = row.get(4)?;
        let tags = serde_json::from_str(&tags).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let deleted_at: Option<i64> = row.get(6)?;
        Ok(Project {
            id: ProjectId(row.get(0)?),
            name: row.get(1)?,
            description: row.get(2)?,
            category: row.get(3)?,
            tags,
            is_deleted: row.get(5)?,
            deleted_at: deleted_at.map(to_datetime),
            created_at: to_datetime(row.get(7)?),
            updated_at: to_datetime(row.get(8)?),
        })
    }
}

/// Escape `%`, `_` and `\` so user search text matches literally in `LIKE`.
fn like_pattern(search: &str) -> String {
    let mut escaped = String::with_capacity(search.len() + 2);
    escaped.push('%');
    for c in search.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

impl Store {
    /// Create a project with its eight stages: `idea` UNLOCKED, the rest LOCKED.
    pub fn create_project(&mut self, input: &NewProject) -> Result<ProjectDetail, StoryflowError> {
        input.validate()?;
        let id = self.write(|tx| ProjectDao::insert(tx, input, now_millis()))?;
        self.get_project(id)
    }

    /// A live project with its stages in pipeline order.
    pub fn get_project(&self, id: ProjectId) -> Result<ProjectDetail, StoryflowError> {
        let project = ProjectDao::require(self.conn(), id)?;
        let stages = StageDao::list_for_project(self.conn(), id)?;
        Ok(ProjectDetail { project, stages })
    }

    /// Live projects, most recently updated first.
    ///
    /// `search` matches name or description case-insensitively.
    pub fn list_projects(&self, query: &ProjectQuery) -> Result<Page<Project>, StoryflowError> {
        query.validate()?;
        let pattern = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(like_pattern);

        let filter = "is_deleted = 0 AND (?1 IS NULL
            OR name LIKE ?1 ESCAPE '\\' OR description LIKE ?1 ESCAPE '\\')";

        let total: i64 = self.conn().query_row(
            &format!("SELECT COUNT(*) FROM projects WHERE {}", filter),
            params![pattern],
            |row| row.get(0),
        )?;

        let offset = i64::from(query.page - 1) * i64::from(query.page_size);
        let sql = format!(
            "SELECT {} FROM projects WHERE {} ORDER BY updated_at DESC, id DESC LIMIT ?2 OFFSET ?3",
            PROJECT_COLUMNS, filter
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let items = stmt
            .query_map(
                params![pattern, i64::from(query.page_size), offset],
                ProjectDao::map_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(
            items,
            total.max(0) as u64,
            query.page,
            query.page_size,
        ))
    }

    /// Apply a partial update to a live project.
    pub fn update_project(
        &mut self,
        id: ProjectId,
        update: &ProjectUpdate,
    ) -> Result<Project, StoryflowError> {
        update.validate()?;
        self.write(|tx| {
            let existing = ProjectDao::require(tx, id)?;
            let name = update.name.as_ref().unwrap_or(&existing.name);
            let description = update.description.as_ref().unwrap_or(&existing.description);
            let category = update.category.as_ref().unwrap_or(&existing.category);
            let tags = serde_json::to_string(update.tags.as_ref().unwrap_or(&existing.tags))?;
            tx.execute(
                "UPDATE projects SET name = ?1, description = ?2, category = ?3, tags = ?4,
                        updated_at = ?5
                 WHERE id = ?6",
                params![name, description, category, tags, now_millis(), id.0],
            )?;
            ProjectDao::require(tx, id)
        })
    }

    /// Soft delete: the project disappears from listings and lookups.
    pub fn delete_project(&mut self, id: ProjectId) -> Result<(), StoryflowError> {
        self.write(|tx| {
            let now = now_millis();
            let changed = tx.execute(
                "UPDATE projects SET is_deleted = 1, deleted_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND is_deleted = 0",
                params![now, id.0],
            )?;
            if changed == 0 {
                return Err(StoryflowError::not_found("Project", id));
            }
            Ok(())
        })
    }

    /// Hard delete a project (live or soft-deleted) with its stages and versions.
    pub fn purge_project(&mut self, id: ProjectId) -> Result<(), StoryflowError> {
        self.write(|tx| {
            let changed = tx.execute("DELETE FROM projects WHERE id = ?1", [id.0])?;
            if changed == 0 {
                return Err(StoryflowError::not_found("Project", id));
            }
            Ok(())
        })
    }
}
