//! Generation settings registry.
//!
//! At most one row is default: setting `is_default` on a row clears it on
//! every other row in the same transaction.

use super::{Store, now_millis, parsed_column, to_datetime};
use crate::types::{AiSettings, NewSettings, SettingsId, SettingsUpdate};
use crate::{SecretBox, StoryflowError};
use rusqlite::{Connection, OptionalExtension, Row, params};

const SETTINGS_COLUMNS: &str = "id, name, provider, base_url, model, temperature, top_p, \
     max_tokens, is_default, is_active, api_key_encrypted, created_at, updated_at";

/// Data access for the `ai_settings` table.
struct SettingsDao;

impl SettingsDao {
    fn get(conn: &Connection, id: SettingsId) -> Result<Option<AiSettings>, StoryflowError> {
        let sql = format!("SELECT {} FROM ai_settings WHERE id = ?1", SETTINGS_COLUMNS);
        Ok(conn.query_row(&sql, [id.0], Self::map_row).optional()?)
    }

    fn require(conn: &Connection, id: SettingsId) -> Result<AiSettings, StoryflowError> {
        Self::get(conn, id)?.ok_or_else(|| StoryflowError::not_found("Settings", id))
    }

    fn unset_other_defaults(conn: &Connection, keep: SettingsId) -> Result<(), StoryflowError> {
        conn.execute(
            "UPDATE ai_settings SET is_default = 0 WHERE is_default = 1 AND id != ?1",
            [keep.0],
        )?;
        Ok(())
    }

    fn encrypt_key(secrets: &SecretBox, api_key: &str) -> Result<String, StoryflowError> {
        if api_key.is_empty() {
            Ok(String::new())
        } else {
            secrets.encrypt(api_key)
        }
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<AiSettings> {
        let api_key_encrypted: String = row.get(10)?;
        Ok(AiSettings {
            id: SettingsId(row.get(0)?),
            name: row.get(1)?,
            provider: parsed_column(row, 2)?,
            base_url: row.get(3)?,
            model: row.get(4)?,
            temperature: row.get(5)?,
            top_p: row.get(6)?,
            max_tokens: row.get(7)?,
            is_default: row.get(8)?,
            is_active: row.get(9)?,
            has_api_key: !api_key_encrypted.is_empty(),
            created_at: to_datetime(row.get(11)?),
            updated_at: to_datetime(row.get(12)?),
            api_key_encrypted,
        })
    }
}

impl Store {
    /// Create settings, encrypting the API key.
    pub fn create_settings(
        &mut self,
        input: &NewSettings,
        secrets: &SecretBox,
    ) -> Result<AiSettings, StoryflowError> {
        input.validate()?;
        let encrypted = SettingsDao::encrypt_key(secrets, &input.api_key)?;
        self.write(|tx| {
            let now = now_millis();
            tx.execute(
                "INSERT INTO ai_settings (name, provider, api_key_encrypted, base_url, model,
                        temperature, top_p, max_tokens, is_default, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10, ?10)",
                params![
                    input.name,
                    input.provider.as_str(),
                    encrypted,
                    input.base_url.trim_end_matches('/'),
                    input.model,
                    input.temperature,
                    input.top_p,
                    input.max_tokens,
                    input.is_default,
                    now
                ],
            )?;
            let id = SettingsId(tx.last_insert_rowid());
            if input.is_default {
                SettingsDao::unset_other_defaults(tx, id)?;
            }
            SettingsDao::require(tx, id)
        })
    }

    /// Active settings, default first.
    pub fn list_settings(&self) -> Result<Vec<AiSettings>, StoryflowError> {
        let sql = format!(
            "SELECT {} FROM ai_settings WHERE is_active = 1 ORDER BY is_default DESC, id",
            SETTINGS_COLUMNS
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let items = stmt
            .query_map([], SettingsDao::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Settings by id, active or not.
    pub fn get_settings(&self, id: SettingsId) -> Result<AiSettings, StoryflowError> {
        SettingsDao::require(self.conn(), id)
    }

    /// Apply a partial update. An empty or absent `api_key` keeps the stored key.
    pub fn update_settings(
        &mut self,
        id: SettingsId,
        update: &SettingsUpdate,
        secrets: &SecretBox,
    ) -> Result<AiSettings, StoryflowError> {
        update.validate()?;
        let new_key = match update.api_key.as_deref() {
            Some(key) if !key.is_empty() => Some(secrets.encrypt(key)?),
            _ => None,
        };
        self.write(|tx| {
            let existing = SettingsDao::require(tx, id)?;
            let is_default = update.is_default.unwrap_or(existing.is_default);
            tx.execute(
                "UPDATE ai_settings SET name = ?1, provider = ?2, api_key_encrypted = ?3,
                        base_url = ?4, model = ?5, temperature = ?6, top_p = ?7, max_tokens = ?8,
                        is_default = ?9, is_active = ?10, updated_at = ?11
                 WHERE id = ?12",
                params![
                    update.name.as_ref().unwrap_or(&existing.name),
                    update.provider.unwrap_or(existing.provider).as_str(),
                    new_key.as_ref().unwrap_or(&existing.api_key_encrypted),
                    update
                        .base_url
                        .as_deref()
                        .unwrap_or(&existing.base_url)
                        .trim_end_matches('/'),
                    update.model.as_ref().unwrap_or(&existing.model),
                    update.temperature.unwrap_or(existing.temperature),
                    update.top_p.unwrap_or(existing.top_p),
                    update.max_tokens.unwrap_or(existing.max_tokens),
                    is_default,
                    update.is_active.unwrap_or(existing.is_active),
                    now_millis(),
                    id.0
                ],
            )?;
            if is_default {
                SettingsDao::unset_other_defaults(tx, id)?;
            }
            SettingsDao::require(tx, id)
        })
    }

    pub fn delete_settings(&mut self, id: SettingsId) -> Result<(), StoryflowError> {
        self.write(|tx| {
            let changed = tx.execute("DELETE FROM ai_settings WHERE id = ?1", [id.0])?;
            if changed == 0 {
                return Err(StoryflowError::not_found("Settings", id));
            }
            Ok(())
        })
    }

    /// Pick the settings a generation request runs with.
    ///
    /// An explicit id must name an active row. Otherwise the active default
    /// wins, then the oldest active row. No active rows is a
    /// `ConfigurationError`.
    pub fn resolve_settings(
        &self,
        explicit: Option<SettingsId>,
    ) -> Result<AiSettings, StoryflowError> {
        if let Some(id) = explicit {
            return SettingsDao::get(self.conn(), id)?
                .filter(|s| s.is_active)
                .ok_or_else(|| StoryflowError::not_found("Settings", id));
        }
        let sql = format!(
            "SELECT {} FROM ai_settings WHERE is_active = 1 ORDER BY is_default DESC, id LIMIT 1",
            SETTINGS_COLUMNS
        );
        self.conn()
            .query_row(&sql, [], SettingsDao::map_row)
            .optional()?
            .ok_or_else(|| {
                StoryflowError::ConfigurationError(
                    "no active generation settings are configured".to_string(),
                )
            })
    }
}
