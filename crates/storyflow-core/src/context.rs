//! # Context Assembler
//!
//! Gathers prior-stage outputs into the mapping used to render prompts.
//!
//! The mapping holds `project_name` plus one entry per stage with non-empty
//! content. It includes every populated stage of the project, not just the
//! declared dependencies of the stage being generated; the declared set is
//! only reported (see [`StageContext::required`]).

use crate::prompt::PROJECT_NAME_KEY;
use crate::registry::StageType;
use crate::types::ProjectDetail;
use serde::Serialize;
use std::collections::BTreeMap;

/// Prompt context keyed by stage identifier (and `project_name`).
pub type ContextMap = BTreeMap<String, String>;

/// Build the prompt context of a project.
#[must_use]
pub fn assemble(project: &ProjectDetail) -> ContextMap {
    let mut context = ContextMap::new();
    context.insert(PROJECT_NAME_KEY.to_string(), project.project.name.clone());
    for stage in project.stages.iter().filter(|s| s.has_content()) {
        context.insert(stage.stage_type.as_str().to_string(), stage.content.clone());
    }
    context
}

/// Context of one stage, with its declared requirements.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageContext {
    pub stage: StageType,
    pub context: ContextMap,
    /// Declared dependencies of the stage.
    pub required: Vec<&'static str>,
    /// Declared dependencies that currently have no content.
    pub missing: Vec<&'static str>,
}

/// Context of `stage` within `project`.
#[must_use]
pub fn stage_context(project: &ProjectDetail, stage: StageType) -> StageContext {
    let context = assemble(project);
    let required = stage.required_context();
    let missing = required
        .iter()
        .copied()
        .filter(|key| !context.contains_key(*key))
        .collect();
    StageContext {
        stage,
        context,
        required,
        missing,
    }
}
