//! Prompt library: one stored template per stage, seeded with the built-in
//! defaults at schema creation.

use super::{Store, now_millis, parsed_column, to_datetime};
use crate::StoryflowError;
use crate::primitives::MAX_PROMPT_LENGTH;
use crate::prompt::default_template;
use crate::registry::{STAGE_ORDER, StageType};
use crate::types::SystemPrompt;
use rusqlite::{Connection, OptionalExtension, Row, params};

/// Data access for the `system_prompts` table.
struct PromptDao;

impl PromptDao {
    fn get(conn: &Connection, stage: StageType) -> Result<Option<SystemPrompt>, StoryflowError> {
        Ok(conn
            .query_row(
                "SELECT stage_type, content, created_at, updated_at
                 FROM system_prompts WHERE stage_type = ?1",
                [stage.as_str()],
                Self::map_row,
            )
            .optional()?)
    }

    fn upsert(conn: &Connection, stage: StageType, content: &str) -> Result<(), StoryflowError> {
        let now = now_millis();
        conn.execute(
            "INSERT INTO system_prompts (stage_type, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(stage_type) DO UPDATE SET content = excluded.content,
                                                   updated_at = excluded.updated_at",
            params![stage.as_str(), content, now],
        )?;
        Ok(())
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<SystemPrompt> {
        Ok(SystemPrompt {
            stage: parsed_column(row, 0)?,
            content: row.get(1)?,
            created_at: to_datetime(row.get(2)?),
            updated_at: to_datetime(row.get(3)?),
        })
    }

    /// A prompt that was never stored: the built-in default.
    fn builtin(stage: StageType) -> SystemPrompt {
        let now = to_datetime(now_millis());
        SystemPrompt {
            stage,
            content: default_template(stage).to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

fn validate_prompt(content: &str) -> Result<(), StoryflowError> {
    if content.trim().is_empty() {
        return Err(StoryflowError::ValidationError(
            "prompt must not be empty".to_string(),
        ));
    }
    let len = content.chars().count();
    if len > MAX_PROMPT_LENGTH {
        return Err(StoryflowError::ValidationError(format!(
            "prompt length {} exceeds maximum {} characters",
            len, MAX_PROMPT_LENGTH
        )));
    }
    Ok(())
}

impl Store {
    /// All eight prompts in pipeline order.
    pub fn list_prompts(&self) -> Result<Vec<SystemPrompt>, StoryflowError> {
        STAGE_ORDER
            .iter()
            .map(|stage| self.get_prompt(*stage))
            .collect()
    }

    /// The stored prompt for `stage`, or the built-in default when absent.
    pub fn get_prompt(&self, stage: StageType) -> Result<SystemPrompt, StoryflowError> {
        let stored = PromptDao::get(self.conn(), stage)?;
        Ok(stored.unwrap_or_else(|| PromptDao::builtin(stage)))
    }

    /// Replace the template for `stage`.
    pub fn update_prompt(
        &mut self,
        stage: StageType,
        content: &str,
    ) -> Result<SystemPrompt, StoryflowError> {
        validate_prompt(content)?;
        self.write(|tx| {
            PromptDao::upsert(tx, stage, content)?;
            PromptDao::get(tx, stage)?.ok_or_else(|| StoryflowError::not_found("Prompt", stage))
        })
    }

    /// Restore the built-in template for `stage`.
    pub fn reset_prompt(&mut self, stage: StageType) -> Result<SystemPrompt, StoryflowError> {
        self.update_prompt(stage, default_template(stage))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_listed_in_order() {
        let store = Store::open_in_memory().unwrap();
        let prompts = store.list_prompts().unwrap();
        assert_eq!(prompts.len(), 8);
        assert_eq!(prompts[0].stage, StageType::Idea);
        assert_eq!(
            prompts[7].content,
            default_template(StageType::MotionPrompt)
        );
    }

    #[test]
    fn update_then_reset() {
        let mut store = Store::open_in_memory().unwrap();
        let updated = store
            .update_prompt(StageType::Script, "Write {story} as a play.")
            .unwrap();
        assert_eq!(updated.content, "Write {story} as a play.");
        assert_eq!(
            store.get_prompt(StageType::Script).unwrap().content,
            "Write {story} as a play."
        );

        let reset = store.reset_prompt(StageType::Script).unwrap();
        assert_eq!(reset.content, default_template(StageType::Script));
    }

    #[test]
    fn missing_row_falls_back_to_builtin() {
        let store = Store::open_in_memory().unwrap();
        store
            .conn()
            .execute("DELETE FROM system_prompts WHERE stage_type = 'scene'", [])
            .unwrap();
        assert_eq!(
            store.get_prompt(StageType::Scene).unwrap().content,
            default_template(StageType::Scene)
        );
    }

    #[test]
    fn empty_or_oversized_prompt_is_rejected() {
        let mut store = Store::open_in_memory().unwrap();
        assert!(store.update_prompt(StageType::Idea, "   ").is_err());
        let huge = "p".repeat(MAX_PROMPT_LENGTH + 1);
        assert!(matches!(
            store.update_prompt(StageType::Idea, &huge),
            Err(StoryflowError::ValidationError(_))
        ));
    }
}
