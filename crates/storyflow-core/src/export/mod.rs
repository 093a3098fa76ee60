//! # Export Module
//!
//! Text renderings of a project and the ZIP bundle that packs them.
//!
//! | Kind | Output |
//! |------|--------|
//! | `markdown` | every populated stage under its display name |
//! | `fountain` | the script stage with a Fountain title page |
//! | `storyboard` | one CSV row per storyboard line |
//! | `prompts` | image and motion prompts as plain text |
//! | `bundle` | ZIP of `project_info.json`, one `.md` per stage and the sub-exports |
//! | `archive` | checksummed binary snapshot for import (see [`archive`]) |
//!
//! The bundle tolerates partial failure: a sub-export that fails is left out
//! and listed in [`BundleReport::skipped`].

pub mod archive;

use crate::StoryflowError;
use crate::registry::{STAGE_ORDER, StageType};
use crate::storage::Store;
use crate::types::{ProjectDetail, ProjectId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::io::{Cursor, Write};
use std::str::FromStr;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

// =============================================================================
// EXPORT KINDS
// =============================================================================

/// A downloadable rendering of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportKind {
    Markdown,
    Fountain,
    Storyboard,
    Prompts,
    Bundle,
    Archive,
}

impl ExportKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ExportKind::Markdown => "markdown",
            ExportKind::Fountain => "fountain",
            ExportKind::Storyboard => "storyboard",
            ExportKind::Prompts => "prompts",
            ExportKind::Bundle => "bundle",
            ExportKind::Archive => "archive",
        }
    }

    /// MIME type of the rendered bytes.
    #[must_use]
    pub const fn content_type(&self) -> &'static str {
        match self {
            ExportKind::Markdown => "text/markdown; charset=utf-8",
            ExportKind::Fountain | ExportKind::Prompts => "text/plain; charset=utf-8",
            ExportKind::Storyboard => "text/csv; charset=utf-8",
            ExportKind::Bundle => "application/zip",
            ExportKind::Archive => "application/octet-stream",
        }
    }

    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            ExportKind::Markdown => "md",
            ExportKind::Fountain => "fountain",
            ExportKind::Storyboard => "csv",
            ExportKind::Prompts => "txt",
            ExportKind::Bundle => "zip",
            ExportKind::Archive => "storyflow",
        }
    }

    /// Download file name, derived from the project name.
    #[must_use]
    pub fn file_name(&self, project_name: &str) -> String {
        let stem: String = project_name
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let stem = stem.trim_matches('_');
        let stem = if stem.is_empty() { "project" } else { stem };
        format!("{}.{}", stem, self.extension())
    }
}

impl fmt::Display for ExportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportKind {
    type Err = StoryflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "markdown" => Ok(ExportKind::Markdown),
            "fountain" => Ok(ExportKind::Fountain),
            "storyboard" => Ok(ExportKind::Storyboard),
            "prompts" => Ok(ExportKind::Prompts),
            "bundle" => Ok(ExportKind::Bundle),
            "archive" => Ok(ExportKind::Archive),
            other => Err(StoryflowError::ValidationError(format!(
                "Unknown export kind: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// TEXT RENDERERS
// =============================================================================

fn populated(project: &ProjectDetail, stage: StageType) -> Option<&str> {
    project
        .stage(stage)
        .map(|s| s.content.as_str())
        .filter(|c| !c.is_empty())
}

/// All populated stages as one Markdown document.
#[must_use]
pub fn render_markdown(project: &ProjectDetail) -> String {
    let mut out = format!("# {}\n", project.project.name);
    if !project.project.description.is_empty() {
        out.push('\n');
        out.push_str(&project.project.description);
        out.push('\n');
    }
    for stage in STAGE_ORDER {
        if let Some(content) = populated(project, stage) {
            out.push_str(&format!("\n## {}\n\n{}\n", stage.display_name(), content));
        }
    }
    out
}

/// The script as a Fountain document. Empty when there is no script.
#[must_use]
pub fn render_fountain(project: &ProjectDetail, exported_at: DateTime<Utc>) -> String {
    let Some(script) = populated(project, StageType::Script) else {
        return String::new();
    };
    [
        format!("Title: {}", project.project.name),
        "Credit: Written with Storyflow".to_string(),
        format!("Date: {}", exported_at.format("%Y-%m-%d")),
        String::new(),
        "===".to_string(),
        String::new(),
        script.to_string(),
    ]
    .join("\n")
}

const STORYBOARD_HEADER: [&str; 7] = [
    "shot",
    "framing",
    "camera",
    "description",
    "dialogue",
    "duration",
    "notes",
];

/// Whether a line only draws a table rule (`|---|:--|`).
fn is_rule(line: &str) -> bool {
    line.chars().all(|c| "|-:+ ".contains(c))
}

/// Split one storyboard line into the six content columns after `shot`.
///
/// Pipe-separated lines map cell by cell (the first cell is the shot label
/// and is renumbered); anything else becomes the description.
fn storyboard_cells(line: &str) -> Option<[String; 6]> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || is_rule(line) {
        return None;
    }
    if !line.contains('|') {
        let mut cells: [String; 6] = Default::default();
        cells[2] = line.to_string();
        return Some(cells);
    }

    let cells: Vec<&str> = line.trim_matches('|').split('|').map(str::trim).collect();
    // `split` always yields at least one cell.
    if cells[0].eq_ignore_ascii_case("shot") {
        return None;
    }
    let cell = |i: usize| cells.get(i).map(|c| (*c).to_string()).unwrap_or_default();
    let rest = cells.get(6..).map(|rest| rest.join(" | "));
    Some([
        cell(1),
        cell(2),
        cell(3),
        cell(4),
        cell(5),
        rest.unwrap_or_default(),
    ])
}

/// The storyboard as CSV, one shot per non-empty, non-heading line.
pub fn render_storyboard_csv(project: &ProjectDetail) -> Result<Vec<u8>, StoryflowError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(STORYBOARD_HEADER)
        .map_err(|e| StoryflowError::SerializationError(e.to_string()))?;

    if let Some(content) = populated(project, StageType::Storyboard) {
        let rows = content.lines().filter_map(storyboard_cells);
        for (index, cells) in rows.enumerate() {
            let shot = (index + 1).to_string();
            let record = std::iter::once(shot.as_str()).chain(cells.iter().map(String::as_str));
            writer
                .write_record(record)
                .map_err(|e| StoryflowError::SerializationError(e.to_string()))?;
        }
    }

    writer
        .into_inner()
        .map_err(|e| StoryflowError::IoError(e.to_string()))
}

/// Image and motion prompts as plain text.
#[must_use]
pub fn render_prompts(project: &ProjectDetail, exported_at: DateTime<Utc>) -> String {
    let mut lines = vec![
        format!("# {} - generation prompts", project.project.name),
        format!("# Exported: {}", exported_at.format("%Y-%m-%d %H:%M")),
        String::new(),
    ];
    for stage in [StageType::ImagePrompt, StageType::MotionPrompt] {
        if let Some(content) = populated(project, stage) {
            lines.push(format!("## {}", stage.display_name()));
            lines.push(String::new());
            lines.push(content.to_string());
            lines.push(String::new());
        }
    }
    lines.join("\n")
}

// =============================================================================
// ZIP BUNDLE
// =============================================================================

/// A bundle entry that could not be produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedEntry {
    pub file: String,
    pub reason: String,
}

/// A finished bundle and the entries left out of it.
#[derive(Debug, Clone)]
pub struct BundleReport {
    pub bytes: Vec<u8>,
    pub skipped: Vec<SkippedEntry>,
}

fn zip_error(e: zip::result::ZipError) -> StoryflowError {
    StoryflowError::IoError(format!("zip: {}", e))
}

/// Sub-exports included in a bundle when their source stages have content.
fn bundle_extras(
    project: &ProjectDetail,
    exported_at: DateTime<Utc>,
) -> Vec<(String, Result<Vec<u8>, StoryflowError>)> {
    let mut extras = Vec::new();
    if populated(project, StageType::Script).is_some() {
        extras.push((
            "script.fountain".to_string(),
            Ok(render_fountain(project, exported_at).into_bytes()),
        ));
    }
    if populated(project, StageType::Storyboard).is_some() {
        extras.push(("storyboard.csv".to_string(), render_storyboard_csv(project)));
    }
    if populated(project, StageType::ImagePrompt).is_some()
        || populated(project, StageType::MotionPrompt).is_some()
    {
        extras.push((
            "prompts.txt".to_string(),
            Ok(render_prompts(project, exported_at).into_bytes()),
        ));
    }
    extras
}

/// The complete project as a ZIP archive.
pub fn render_bundle(
    project: &ProjectDetail,
    exported_at: DateTime<Utc>,
) -> Result<BundleReport, StoryflowError> {
    write_bundle(project, exported_at, bundle_extras(project, exported_at))
}

/// Write the bundle with the given sub-exports. Failed sub-exports are skipped.
pub fn write_bundle(
    project: &ProjectDetail,
    exported_at: DateTime<Utc>,
    extras: Vec<(String, Result<Vec<u8>, StoryflowError>)>,
) -> Result<BundleReport, StoryflowError> {
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    let info = serde_json::json!({
        "name": project.project.name,
        "description": project.project.description,
        "category": project.project.category,
        "tags": project.project.tags,
        "created_at": project.project.created_at,
        "exported_at": exported_at,
    });
    zip.start_file("project_info.json", options)
        .map_err(zip_error)?;
    zip.write_all(serde_json::to_string_pretty(&info)?.as_bytes())?;

    for stage in STAGE_ORDER {
        if let Some(content) = populated(project, stage) {
            zip.start_file(format!("{}.md", stage.as_str()), options)
                .map_err(zip_error)?;
            let page = format!("# {}\n\n{}", stage.display_name(), content);
            zip.write_all(page.as_bytes())?;
        }
    }

    let mut skipped = Vec::new();
    for (file, rendered) in extras {
        match rendered {
            Ok(bytes) => {
                zip.start_file(file.as_str(), options).map_err(zip_error)?;
                zip.write_all(&bytes)?;
            }
            Err(e) => skipped.push(SkippedEntry {
                file,
                reason: e.to_string(),
            }),
        }
    }

    let bytes = zip.finish().map_err(zip_error)?.into_inner();
    Ok(BundleReport { bytes, skipped })
}

// =============================================================================
// EXPORT ENTRY POINT
// =============================================================================

/// One rendered export, ready to be served or written to disk.
#[derive(Debug, Clone)]
pub struct ExportFile {
    pub kind: ExportKind,
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Bundle entries left out; always empty for other kinds.
    pub skipped: Vec<SkippedEntry>,
}

impl Store {
    /// Render `kind` for a live project.
    pub fn render_export(
        &self,
        project_id: ProjectId,
        kind: ExportKind,
        exported_at: DateTime<Utc>,
    ) -> Result<ExportFile, StoryflowError> {
        let detail = self.get_project(project_id)?;
        let mut skipped = Vec::new();
        let bytes = match kind {
            ExportKind::Markdown => render_markdown(&detail).into_bytes(),
            ExportKind::Fountain => render_fountain(&detail, exported_at).into_bytes(),
            ExportKind::Storyboard => render_storyboard_csv(&detail)?,
            ExportKind::Prompts => render_prompts(&detail, exported_at).into_bytes(),
            ExportKind::Bundle => {
                let report = render_bundle(&detail, exported_at)?;
                skipped = report.skipped;
                report.bytes
            }
            ExportKind::Archive => {
                archive::encode_archive(&self.export_archive(project_id, exported_at)?)?
            }
        };
        Ok(ExportFile {
            kind,
            file_name: kind.file_name(&detail.project.name),
            bytes,
            skipped,
        })
    }
}
