//! # Prompt Templates
//!
//! Built-in instruction templates per stage and the placeholder renderer.
//!
//! Placeholders are `{key}` where `key` is one of the eight stage identifiers
//! or `project_name`. A recognised placeholder whose context value is missing
//! or empty renders as [`NOT_PROVIDED`]. Any other brace text (JSON samples,
//! `{shot}` style notes) is copied through untouched.

use crate::primitives::NOT_PROVIDED;
use crate::registry::{STAGE_ORDER, StageType};
use std::collections::BTreeMap;

/// Context key carrying the project name.
pub const PROJECT_NAME_KEY: &str = "project_name";

/// Whether `key` is a placeholder the renderer substitutes.
#[must_use]
pub fn is_placeholder_key(key: &str) -> bool {
    key == PROJECT_NAME_KEY || STAGE_ORDER.iter().any(|s| s.as_str() == key)
}

/// Whether `after` holds a known key terminated by `}` at `close`.
fn closes_placeholder(after: &str, close: usize) -> bool {
    after.as_bytes()[close] == b'}' && is_placeholder_key(&after[..close])
}

/// Substitute placeholders in `template` with values from `context`.
#[must_use]
pub fn render(template: &str, context: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find(['}', '{']) {
            Some(close) if closes_placeholder(after, close) => {
                let key = &after[..close];
                match context.get(key).map(String::as_str) {
                    Some(value) if !value.is_empty() => out.push_str(value),
                    _ => out.push_str(NOT_PROVIDED),
                }
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// The built-in template for `stage`.
#[must_use]
pub const fn default_template(stage: StageType) -> &'static str {
    match stage {
        StageType::Idea => IDEA_TEMPLATE,
        StageType::Story => STORY_TEMPLATE,
        StageType::Script => SCRIPT_TEMPLATE,
        StageType::Character => CHARACTER_TEMPLATE,
        StageType::Scene => SCENE_TEMPLATE,
        StageType::Storyboard => STORYBOARD_TEMPLATE,
        StageType::ImagePrompt => IMAGE_PROMPT_TEMPLATE,
        StageType::MotionPrompt => MOTION_PROMPT_TEMPLATE,
    }
}

const IDEA_TEMPLATE: &str = "You are a story development consultant working on \"{project_name}\".
Expand the following seed idea into a developed concept.

Seed idea:
{idea}

Cover:
1. Genre and tone
2. Core conflict
3. Theme
4. Target audience
5. What makes it distinctive

Keep the answer professional but creative.";

const STORY_TEMPLATE: &str = "You are an experienced story editor. Write a complete story outline
based on this concept.

Concept:
{idea}

Include:
1. Setting (time, place, background)
2. Main characters
3. Three-act structure:
   - Act one: setup
   - Act two: confrontation
   - Act three: climax and resolution
4. The message of the story

Aim for 800 to 1500 words.";

const SCRIPT_TEMPLATE: &str = "You are a professional screenwriter. Write a first draft script
from this outline.

Story outline:
{story}

Format:
1. Scene headings: INT./EXT. LOCATION - TIME
2. Action lines: short and visual
3. Dialogue: character name in capitals, optional parenthetical, then the line

Write every scene with its dialogue.";

const CHARACTER_TEMPLATE: &str = "You are a character designer. Create a design sheet for every
main character in this script.

Story outline:
{story}

Script:
{script}

For each character describe:
1. Name, age, occupation
2. Appearance (hair, build, wardrobe)
3. Personality
4. Backstory
5. Motivation
6. Arc across the story
7. Relationships with the other characters";

const SCENE_TEMPLATE: &str = "You are a production designer. Design the main locations of
this script.

Story outline:
{story}

Script:
{script}

For each location describe:
1. Name and type
2. Size and layout
3. Atmosphere (light, palette, time of day)
4. Key props and set dressing
5. Visual references
6. Special effects needs";

const STORYBOARD_TEMPLATE: &str = "You are a storyboard artist. Break this script into shots.

Script:
{script}

Write one shot per line using this layout:
Shot | Framing | Camera move | Description | Dialogue/Sound | Duration

Framing: extreme wide, wide, full, medium, close-up, extreme close-up
Camera move: static, push in, pull out, pan, tilt, dolly, follow, crane, handheld";

const IMAGE_PROMPT_TEMPLATE: &str = "You are an expert in image generation prompts. Write an image
prompt for every shot of this storyboard.

Storyboard:
{storyboard}

Characters:
{character}

Locations:
{scene}

For each shot include subject, action, setting, lighting, style and composition.
Use this layout:
Shot X:
Positive: ...
Negative: ...";

const MOTION_PROMPT_TEMPLATE: &str = "You are an expert in video generation prompts. Write a motion
prompt for every shot of this storyboard.

Storyboard:
{storyboard}

For each shot include the subject's movement, the camera instruction and a suggested
duration. Use this layout:
Shot X:
Motion: ...
Camera: ...
Duration: ...";

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn known_placeholders_are_substituted() {
        let context = ctx(&[("idea", "heist"), ("project_name", "Vault")]);
        let out = render("A {idea} in {project_name}.", &context);
        assert_eq!(out, "A heist in Vault.");
    }

    #[test]
    fn missing_and_empty_values_use_sentinel() {
        let out = render("{story}|{script}", &ctx(&[("story", "")]));
        assert_eq!(out, format!("{}|{}", NOT_PROVIDED, NOT_PROVIDED));
    }

    #[test]
    fn unknown_braces_are_untouched() {
        let template = "{\"shot\": {idea}} {unknown} {";
        let out = render(template, &ctx(&[("idea", "x")]));
        assert_eq!(out, "{\"shot\": x} {unknown} {");
    }

    #[test]
    fn nested_open_brace_does_not_swallow_placeholder() {
        let out = render("{{idea}}", &ctx(&[("idea", "x")]));
        assert_eq!(out, "{x}");
    }

    #[test]
    fn substituted_values_are_not_rendered_again() {
        let out = render("{idea}", &ctx(&[("idea", "{story}"), ("story", "nope")]));
        assert_eq!(out, "{story}");
    }

    #[test]
    fn every_default_template_references_a_placeholder() {
        for stage in STAGE_ORDER {
            let rendered = render(default_template(stage), &BTreeMap::new());
            assert!(
                rendered.contains(NOT_PROVIDED),
                "{} has no placeholder",
                stage
            );
        }
    }
}
