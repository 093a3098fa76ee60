//! # Stage Registry
//!
//! The fixed eight-stage pipeline of a Storyflow project.
//!
//! | # | Stage | Declared dependencies |
//! |---|-------|-----------------------|
//! | 1 | `idea` | none |
//! | 2 | `story` | idea |
//! | 3 | `script` | story |
//! | 4 | `character` | story, script |
//! | 5 | `scene` | story, script |
//! | 6 | `storyboard` | story, script |
//! | 7 | `image_prompt` | storyboard |
//! | 8 | `motion_prompt` | storyboard |
//!
//! Dependencies are declared data and are shallow: `image_prompt` depends on
//! `storyboard` only, not on everything `storyboard` depends on. They are
//! advisory. Generation context is assembled from every populated stage
//! (see [`crate::context`]), not from this table.

use crate::StoryflowError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One step of the content pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageType {
    Idea,
    Story,
    Script,
    Character,
    Scene,
    Storyboard,
    ImagePrompt,
    MotionPrompt,
}

/// Canonical stage order. Position in this array drives unlock propagation.
pub const STAGE_ORDER: [StageType; 8] = [
    StageType::Idea,
    StageType::Story,
    StageType::Script,
    StageType::Character,
    StageType::Scene,
    StageType::Storyboard,
    StageType::ImagePrompt,
    StageType::MotionPrompt,
];

impl StageType {
    /// Stable identifier used in storage, URLs and prompt placeholders.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            StageType::Idea => "idea",
            StageType::Story => "story",
            StageType::Script => "script",
            StageType::Character => "character",
            StageType::Scene => "scene",
            StageType::Storyboard => "storyboard",
            StageType::ImagePrompt => "image_prompt",
            StageType::MotionPrompt => "motion_prompt",
        }
    }

    /// Human-readable name used as a heading in exports.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            StageType::Idea => "Idea",
            StageType::Story => "Story Outline",
            StageType::Script => "Script Draft",
            StageType::Character => "Character Design",
            StageType::Scene => "Scene Design",
            StageType::Storyboard => "Storyboard",
            StageType::ImagePrompt => "Image Prompts",
            StageType::MotionPrompt => "Motion Prompts",
        }
    }

    /// Zero-based position in [`STAGE_ORDER`].
    #[must_use]
    pub fn position(&self) -> usize {
        STAGE_ORDER
            .iter()
            .position(|s| s == self)
            .unwrap_or(STAGE_ORDER.len())
    }

    /// The stage unlocked when this one first receives content.
    #[must_use]
    pub fn next(&self) -> Option<StageType> {
        STAGE_ORDER.get(self.position() + 1).copied()
    }

    /// The stage before this one, if any.
    #[must_use]
    pub fn previous(&self) -> Option<StageType> {
        self.position()
            .checked_sub(1)
            .and_then(|p| STAGE_ORDER.get(p).copied())
    }

    /// Whether this is the first stage (created unlocked).
    #[must_use]
    pub fn is_first(&self) -> bool {
        self.position() == 0
    }

    /// Declared predecessor stages whose content this stage expects.
    #[must_use]
    pub const fn dependencies(&self) -> &'static [StageType] {
        match self {
            StageType::Idea => &[],
            StageType::Story => &[StageType::Idea],
            StageType::Script => &[StageType::Story],
            StageType::Character | StageType::Scene | StageType::Storyboard => {
                &[StageType::Story, StageType::Script]
            }
            StageType::ImagePrompt | StageType::MotionPrompt => &[StageType::Storyboard],
        }
    }

    /// Identifiers of the declared dependencies, as reported to callers.
    #[must_use]
    pub fn required_context(&self) -> Vec<&'static str> {
        self.dependencies().iter().map(StageType::as_str).collect()
    }
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageType {
    type Err = StoryflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        STAGE_ORDER
            .iter()
            .find(|stage| stage.as_str() == s)
            .copied()
            .ok_or_else(|| StoryflowError::ValidationError(format!("Unknown stage type: {}", s)))
    }
}

// =============================================================================
// TESTS
// =============================================================================
