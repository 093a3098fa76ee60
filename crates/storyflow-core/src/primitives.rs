//! # Primitives
//!
//! Hardcoded runtime constants for the Storyflow CORE.
//!
//! These values are compiled into the binary and are immutable at runtime.
//! Input validation limits live here so that every entry point (HTTP, CLI,
//! archive import) rejects the same inputs.

/// Magic bytes for the Storyflow project archive header.
pub const MAGIC_BYTES: &[u8; 4] = b"STFL";

/// Current archive format version.
///
/// Increment this when making breaking changes to the archive format.
pub const FORMAT_VERSION: u8 = 1;

/// Relational schema version, stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Placeholder value substituted for context keys that are missing or empty.
pub const NOT_PROVIDED: &str = "[not provided]";

/// Milliseconds a writer waits on a locked database before failing.
pub const BUSY_TIMEOUT_MS: u64 = 5_000;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length of a project name (characters).
pub const MAX_PROJECT_NAME_LENGTH: usize = 255;

/// Maximum length of a project description.
pub const MAX_DESCRIPTION_LENGTH: usize = 5_000;

/// Maximum length of a project category.
pub const MAX_CATEGORY_LENGTH: usize = 50;

/// Maximum number of tags on a project.
pub const MAX_TAG_COUNT: usize = 32;

/// Maximum length of a single tag.
pub const MAX_TAG_LENGTH: usize = 50;

/// Maximum length of stage content.
///
/// Applies to manual edits and to generated content alike.
pub const MAX_CONTENT_LENGTH: usize = 100_000;

/// Maximum length of a version label.
pub const MAX_LABEL_LENGTH: usize = 100;

/// Maximum length of a settings name.
pub const MAX_SETTINGS_NAME_LENGTH: usize = 100;

/// Maximum length of a generator base URL.
pub const MAX_BASE_URL_LENGTH: usize = 500;

/// Maximum length of a model name.
pub const MAX_MODEL_LENGTH: usize = 100;

/// Maximum length of a prompt template.
pub const MAX_PROMPT_LENGTH: usize = 20_000;

/// Maximum page size for listings.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Upper bound for sampling temperature.
pub const MAX_TEMPERATURE: f64 = 2.0;

/// Upper bound for nucleus sampling.
pub const MAX_TOP_P: f64 = 1.0;

/// Smallest accepted token budget.
pub const MAX_TOKENS_FLOOR: u32 = 100;

/// Largest accepted token budget.
pub const MAX_TOKENS_CEILING: u32 = 16_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_bytes_correct() {
        assert_eq!(MAGIC_BYTES, b"STFL");
    }

    #[test]
    fn token_bounds_are_ordered() {
        assert!(MAX_TOKENS_FLOOR < MAX_TOKENS_CEILING);
    }
}
