//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.
//! Each command opens its own store connection; writes use immediate
//! transactions, so running commands next to a live server is safe.

use super::{GenerateArgs, ProjectsCommand, PromptsCommand, SettingsCommand, StageCommand};
use crate::api;
use crate::config::AppConfig;
use crate::generation::{
    GenerateRequest, GeneratorFactory, HttpGeneratorFactory, Orchestrator, StreamEvent,
};
use futures::StreamExt;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storyflow_core::{
    ExportKind, NewProject, NewSettings, ProjectId, ProjectQuery, ProjectUpdate, SettingsId,
    SettingsUpdate, Stage, StageEdit, StageStatus, StageType, Store, StoryflowError, VersionId,
    decode_archive, stage_context,
};
use tokio::sync::Mutex;

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum size of a text file read into a stage or prompt (1 MB).
const MAX_TEXT_FILE_SIZE: u64 = 1024 * 1024;

/// Maximum size of an archive accepted by `import` (100 MB).
const MAX_IMPORT_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), StoryflowError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| StoryflowError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(StoryflowError::ValidationError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Canonicalize an input path and make sure it is a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, StoryflowError> {
    let canonical = path.canonicalize().map_err(|e| {
        StoryflowError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(StoryflowError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Canonicalize the parent of an output path and make sure it is a directory.
fn validate_output_path(path: &Path) -> Result<PathBuf, StoryflowError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        StoryflowError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(StoryflowError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| StoryflowError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

/// Read a bounded UTF-8 text file.
fn read_text_file(path: &Path) -> Result<String, StoryflowError> {
    let validated = validate_file_path(path)?;
    validate_file_size(&validated, MAX_TEXT_FILE_SIZE)?;
    Ok(std::fs::read_to_string(&validated)?)
}

// =============================================================================
// OUTPUT HELPERS
// =============================================================================

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_default()
    );
}

fn open_store(config: &AppConfig) -> Result<Store, StoryflowError> {
    Store::open(&config.database)
}

fn parse_stage(stage: &str) -> Result<StageType, StoryflowError> {
    stage.parse()
}

/// First line of `text`, cut to `max` characters.
fn preview(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    let mut out: String = line.chars().take(max).collect();
    if line.chars().count() > max || text.lines().nth(1).is_some() {
        out.push('…');
    }
    out
}

fn print_stage_line(stage: &Stage) {
    println!(
        "  {:<14} {:<12} {}",
        stage.stage_type.as_str(),
        stage.status.as_str(),
        preview(&stage.content, 50)
    );
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(config: AppConfig) -> Result<(), StoryflowError> {
    println!("Storyflow Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Host:     {}", config.host);
    println!("  Port:     {}", config.port);
    println!("  Database: {:?}", config.database);
    println!(
        "  Auth:     {}",
        if config.api_key().is_some() {
            "api key"
        } else {
            "disabled"
        }
    );
    println!();
    println!("Endpoints:");
    println!("  /api/v1/projects      - Projects, stages and versions");
    println!("  /api/v1/ai/generate   - Generate a stage (add /stream for SSE)");
    println!("  /api/v1/settings/ai   - Generation settings");
    println!("  /api/v1/prompts       - Prompt templates");
    println!("  /health               - Health check");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    api::run_server(config).await
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize a new database and make sure a secret is available.
pub fn cmd_init(config: &AppConfig, force: bool, json_mode: bool) -> Result<(), StoryflowError> {
    let db_path = &config.database;
    if db_path.exists() {
        if !force {
            return Err(StoryflowError::ConfigurationError(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        for suffix in ["", "-wal", "-shm"] {
            let mut path = db_path.clone().into_os_string();
            path.push(suffix);
            let path = PathBuf::from(path);
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }
    }

    let store = open_store(config)?;
    config.secret_box()?;

    if json_mode {
        print_json(&serde_json::json!({
            "database": db_path.to_string_lossy(),
            "schema_version": store.schema_version()?,
        }));
    } else {
        println!("Initialized new database at {:?}", db_path);
        if config.secret_key.is_none() {
            println!("Secret key file: {:?}", config.key_file_path());
        }
    }
    Ok(())
}

// =============================================================================
// PROJECTS COMMAND
// =============================================================================

pub fn cmd_projects(
    config: &AppConfig,
    command: ProjectsCommand,
    json_mode: bool,
) -> Result<(), StoryflowError> {
    let mut store = open_store(config)?;

    match command {
        ProjectsCommand::List {
            page,
            page_size,
            search,
        } => {
            let listing = store.list_projects(&ProjectQuery {
                page,
                page_size,
                search,
            })?;
            if json_mode {
                print_json(&listing);
                return Ok(());
            }
            println!(
                "Projects (page {} of {}, {} total)",
                listing.page,
                listing.total_pages.max(1),
                listing.total
            );
            println!("==================");
            for project in &listing.items {
                println!(
                    "  #{:<5} {:<30} {}",
                    project.id,
                    preview(&project.name, 30),
                    project.updated_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        ProjectsCommand::Create {
            name,
            description,
            category,
            tags,
        } => {
            let detail = store.create_project(&NewProject {
                name,
                description,
                category,
                tags,
            })?;
            if json_mode {
                print_json(&detail);
            } else {
                println!(
                    "Created project #{} \"{}\"",
                    detail.project.id, detail.project.name
                );
            }
        }
        ProjectsCommand::Show { id } => {
            let detail = store.get_project(ProjectId(id))?;
            if json_mode {
                print_json(&detail);
                return Ok(());
            }
            println!("Project #{}: {}", detail.project.id, detail.project.name);
            println!("==================");
            if !detail.project.description.is_empty() {
                println!("{}", detail.project.description);
            }
            if !detail.project.tags.is_empty() {
                println!("Tags: {}", detail.project.tags.join(", "));
            }
            println!();
            for stage in &detail.stages {
                print_stage_line(stage);
            }
        }
        ProjectsCommand::Update {
            id,
            name,
            description,
            category,
            tags,
        } => {
            let project = store.update_project(
                ProjectId(id),
                &ProjectUpdate {
                    name,
                    description,
                    category,
                    tags,
                },
            )?;
            if json_mode {
                print_json(&project);
            } else {
                println!("Updated project #{}", project.id);
            }
        }
        ProjectsCommand::Delete { id } => {
            store.delete_project(ProjectId(id))?;
            if !json_mode {
                println!("Deleted project #{}", id);
            }
        }
        ProjectsCommand::Purge { id } => {
            store.purge_project(ProjectId(id))?;
            if !json_mode {
                println!("Purged project #{}", id);
            }
        }
    }
    Ok(())
}

// =============================================================================
// STAGE COMMAND
// =============================================================================

pub fn cmd_stage(
    config: &AppConfig,
    command: StageCommand,
    json_mode: bool,
) -> Result<(), StoryflowError> {
    let mut store = open_store(config)?;

    let show = |stage: &Stage| {
        if json_mode {
            print_json(stage);
        } else {
            println!(
                "{} ({})",
                stage.stage_type.display_name(),
                stage.status.as_str()
            );
            println!("==================");
            println!("{}", stage.content);
        }
    };

    match command {
        StageCommand::Show { project, stage } => {
            let stage = store.get_stage(ProjectId(project), parse_stage(&stage)?)?;
            show(&stage);
        }
        StageCommand::Set {
            project,
            stage,
            content,
            file,
            status,
        } => {
            let content = match (content, file) {
                (Some(content), _) => content,
                (None, Some(file)) => read_text_file(&file)?,
                (None, None) => String::new(),
            };
            let status = status.map(|s| s.parse::<StageStatus>()).transpose()?;
            let stage = store.set_content(
                ProjectId(project),
                parse_stage(&stage)?,
                &StageEdit { content, status },
            )?;
            show(&stage);
        }
        StageCommand::Complete { project, stage } => {
            let stage = store.complete_stage(ProjectId(project), parse_stage(&stage)?)?;
            show(&stage);
        }
        StageCommand::Context { project, stage } => {
            let detail = store.get_project(ProjectId(project))?;
            let context = stage_context(&detail, parse_stage(&stage)?);
            if json_mode {
                print_json(&context);
                return Ok(());
            }
            println!("Context for {}", context.stage.display_name());
            println!("==================");
            println!("Required: {}", context.required.join(", "));
            if !context.missing.is_empty() {
                println!("Missing:  {}", context.missing.join(", "));
            }
            for (key, value) in &context.context {
                println!("  {:<14} {}", key, preview(value, 50));
            }
        }
        StageCommand::Versions { project, stage } => {
            let versions = store.list_versions(ProjectId(project), parse_stage(&stage)?)?;
            if json_mode {
                print_json(&versions);
                return Ok(());
            }
            for version in &versions {
                println!(
                    "  v{:<4} id={:<6} {:<8} {:<16} {}",
                    version.version_number,
                    version.id,
                    version.source.as_str(),
                    version.label.as_deref().unwrap_or("-"),
                    preview(&version.content, 40)
                );
            }
        }
        StageCommand::Restore {
            project,
            stage,
            version,
        } => {
            let stage = store.restore_version(
                ProjectId(project),
                parse_stage(&stage)?,
                VersionId(version),
            )?;
            show(&stage);
        }
        StageCommand::Label {
            project,
            stage,
            version,
            label,
        } => {
            let version = store.rename_version(
                ProjectId(project),
                parse_stage(&stage)?,
                VersionId(version),
                label.as_deref(),
            )?;
            if json_mode {
                print_json(&version);
            } else {
                println!(
                    "Version {} label: {}",
                    version.version_number,
                    version.label.as_deref().unwrap_or("(none)")
                );
            }
        }
        StageCommand::DeleteVersion {
            project,
            stage,
            version,
        } => {
            store.delete_version(ProjectId(project), parse_stage(&stage)?, VersionId(version))?;
            if !json_mode {
                println!("Deleted version id={}", version);
            }
        }
    }
    Ok(())
}

// =============================================================================
// GENERATE COMMAND
// =============================================================================

fn orchestrator(config: &AppConfig) -> Result<Orchestrator, StoryflowError> {
    let secrets = config.secret_box()?;
    let store = Arc::new(Mutex::new(open_store(config)?));
    let factory: Arc<dyn GeneratorFactory> =
        Arc::new(HttpGeneratorFactory::new(config.request_timeout())?);
    Ok(Orchestrator::new(store, secrets, factory))
}

/// Generate one stage, optionally printing tokens as they arrive.
pub async fn cmd_generate(
    config: &AppConfig,
    args: GenerateArgs,
    json_mode: bool,
) -> Result<(), StoryflowError> {
    let custom_prompt = args.prompt_file.as_deref().map(read_text_file).transpose()?;
    let request = GenerateRequest {
        settings_id: args.settings.map(SettingsId),
        custom_prompt,
        temperature: args.temperature,
        max_tokens: args.max_tokens,
        ..GenerateRequest::new(ProjectId(args.project), parse_stage(&args.stage)?)
    };
    let orchestrator = orchestrator(config)?;

    if !args.stream {
        let outcome = orchestrator.generate(&request).await?;
        if json_mode {
            print_json(&outcome);
        } else {
            println!("{}", outcome.stage.content);
            eprintln!(
                "Saved as version {} of {}",
                outcome.version.version_number,
                outcome.stage.stage_type.display_name()
            );
        }
        return Ok(());
    }

    let mut events = orchestrator.stream(request).await?;
    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await {
        match event? {
            StreamEvent::Token(token) => {
                if !json_mode {
                    stdout.write_all(token.as_bytes())?;
                    stdout.flush()?;
                }
            }
            StreamEvent::Done(outcome) => {
                if json_mode {
                    print_json(&outcome);
                } else {
                    println!();
                    eprintln!(
                        "Saved as version {} of {}",
                        outcome.version.version_number,
                        outcome.stage.stage_type.display_name()
                    );
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// SETTINGS COMMAND
// =============================================================================

pub async fn cmd_settings(
    config: &AppConfig,
    command: SettingsCommand,
    json_mode: bool,
) -> Result<(), StoryflowError> {
    let mut store = open_store(config)?;

    match command {
        SettingsCommand::List => {
            let settings = store.list_settings()?;
            if json_mode {
                print_json(&settings);
                return Ok(());
            }
            for s in &settings {
                println!(
                    "  #{:<4} {:<20} {:<8} {:<20} {}{}",
                    s.id,
                    s.name,
                    s.provider.as_str(),
                    s.model,
                    s.base_url,
                    if s.is_default { "  (default)" } else { "" }
                );
            }
        }
        SettingsCommand::Add {
            name,
            provider,
            base_url,
            model,
            temperature,
            top_p,
            max_tokens,
            default,
            api_key,
        } => {
            let secrets = config.secret_box()?;
            let settings = store.create_settings(
                &NewSettings {
                    name,
                    provider: provider.parse()?,
                    base_url,
                    model,
                    temperature,
                    top_p,
                    max_tokens,
                    is_default: default,
                    api_key,
                },
                &secrets,
            )?;
            if json_mode {
                print_json(&settings);
            } else {
                println!("Added settings #{} \"{}\"", settings.id, settings.name);
            }
        }
        SettingsCommand::Update {
            id,
            name,
            base_url,
            model,
            temperature,
            top_p,
            max_tokens,
            default,
            active,
            api_key,
        } => {
            let secrets = config.secret_box()?;
            let settings = store.update_settings(
                SettingsId(id),
                &SettingsUpdate {
                    name,
                    provider: None,
                    api_key,
                    base_url,
                    model,
                    temperature,
                    top_p,
                    max_tokens,
                    is_default: default,
                    is_active: active,
                },
                &secrets,
            )?;
            if json_mode {
                print_json(&settings);
            } else {
                println!("Updated settings #{}", settings.id);
            }
        }
        SettingsCommand::Remove { id } => {
            store.delete_settings(SettingsId(id))?;
            if !json_mode {
                println!("Removed settings #{}", id);
            }
        }
        SettingsCommand::Test { id } => {
            let settings = store.get_settings(SettingsId(id))?;
            let secrets = config.secret_box()?;
            let factory = HttpGeneratorFactory::new(config.request_timeout())?;
            let check = factory.create(&settings, &secrets)?.test_connection().await;
            if json_mode {
                print_json(&check);
            } else if check.success {
                println!("OK: {}", check.message);
            } else {
                println!("FAILED: {}", check.message);
            }
        }
    }
    Ok(())
}

// =============================================================================
// PROMPTS COMMAND
// =============================================================================

pub fn cmd_prompts(
    config: &AppConfig,
    command: PromptsCommand,
    json_mode: bool,
) -> Result<(), StoryflowError> {
    let mut store = open_store(config)?;

    let prompt = match command {
        PromptsCommand::List => {
            let prompts = store.list_prompts()?;
            if json_mode {
                print_json(&prompts);
            } else {
                for p in &prompts {
                    println!("  {:<14} {}", p.stage.as_str(), preview(&p.content, 60));
                }
            }
            return Ok(());
        }
        PromptsCommand::Show { stage } => store.get_prompt(parse_stage(&stage)?)?,
        PromptsCommand::Set { stage, file } => {
            let content = read_text_file(&file)?;
            store.update_prompt(parse_stage(&stage)?, &content)?
        }
        PromptsCommand::Reset { stage } => store.reset_prompt(parse_stage(&stage)?)?,
    };

    if json_mode {
        print_json(&prompt);
    } else {
        println!("{}", prompt.content);
    }
    Ok(())
}

// =============================================================================
// EXPORT COMMAND
// =============================================================================

/// Export a project to a file.
pub fn cmd_export(
    config: &AppConfig,
    project: i64,
    kind: &str,
    output: Option<&Path>,
    json_mode: bool,
) -> Result<(), StoryflowError> {
    let kind: ExportKind = kind.parse()?;
    let store = open_store(config)?;
    let file = store.render_export(ProjectId(project), kind, chrono::Utc::now())?;

    for entry in &file.skipped {
        tracing::warn!(
            project_id = project,
            file = %entry.file,
            reason = %entry.reason,
            "Bundle entry skipped"
        );
    }

    let output = output.map_or_else(|| PathBuf::from(&file.file_name), Path::to_path_buf);
    let validated_output = validate_output_path(&output)?;
    std::fs::write(&validated_output, &file.bytes)?;

    if json_mode {
        print_json(&serde_json::json!({
            "kind": kind,
            "path": validated_output.to_string_lossy(),
            "bytes": file.bytes.len(),
            "skipped": file.skipped,
        }));
    } else {
        println!(
            "Exported {} bytes to {:?}",
            file.bytes.len(),
            validated_output
        );
        for entry in &file.skipped {
            println!("  skipped {}: {}", entry.file, entry.reason);
        }
    }
    Ok(())
}

// =============================================================================
// IMPORT COMMAND
// =============================================================================

/// Import a project archive as a new project.
pub fn cmd_import(
    config: &AppConfig,
    input: &Path,
    json_mode: bool,
) -> Result<(), StoryflowError> {
    let validated_path = validate_file_path(input)?;
    validate_file_size(&validated_path, MAX_IMPORT_FILE_SIZE)?;

    let data = std::fs::read(&validated_path)?;
    let archive = decode_archive(&data)?;
    let mut store = open_store(config)?;
    let detail = store.import_archive(&archive)?;

    if json_mode {
        print_json(&detail);
    } else {
        println!(
            "Imported project #{} \"{}\"",
            detail.project.id, detail.project.name
        );
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn config_in(dir: &Path) -> AppConfig {
        AppConfig {
            database: dir.join("cli.db"),
            secret_key: Some("cli-test".to_string()),
            ..AppConfig::default()
        }
    }

    #[test]
    fn preview_cuts_long_and_multiline_text() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("abcdef", 3), "abc…");
        assert_eq!(preview("one\ntwo", 10), "one…");
        assert_eq!(preview("", 10), "");
    }

    #[test]
    fn init_refuses_existing_database_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        cmd_init(&config, false, true).unwrap();
        assert!(matches!(
            cmd_init(&config, false, true),
            Err(StoryflowError::ConfigurationError(_))
        ));
        cmd_init(&config, true, true).unwrap();
    }

    #[test]
    fn stage_set_reads_content_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let id = open_store(&config)
            .unwrap()
            .create_project(&NewProject::named("File"))
            .unwrap()
            .project
            .id;
        let file = dir.path().join("idea.txt");
        std::fs::write(&file, "a lighthouse keeper").unwrap();

        cmd_stage(
            &config,
            StageCommand::Set {
                project: id.0,
                stage: "idea".to_string(),
                content: None,
                file: Some(file),
                status: None,
            },
            true,
        )
        .unwrap();

        let store = open_store(&config).unwrap();
        assert_eq!(
            store.get_stage(id, StageType::Idea).unwrap().content,
            "a lighthouse keeper"
        );
    }

    #[test]
    fn export_then_import_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let id = {
            let mut store = open_store(&config).unwrap();
            let id = store
                .create_project(&NewProject::named("Round Trip"))
                .unwrap()
                .project
                .id;
            store
                .set_content(id, StageType::Idea, &StageEdit::content("x"))
                .unwrap();
            id
        };

        let path = dir.path().join("out.storyflow");
        cmd_export(&config, id.0, "archive", Some(&path), true).unwrap();
        cmd_import(&config, &path, true).unwrap();

        let store = open_store(&config).unwrap();
        let listing = store.list_projects(&ProjectQuery::default()).unwrap();
        assert_eq!(listing.total, 2);
    }

    #[test]
    fn unknown_export_kind_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        assert!(matches!(
            cmd_export(&config, 1, "pdf", None, true),
            Err(StoryflowError::ValidationError(_))
        ));
    }
}
