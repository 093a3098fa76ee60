//! # Storyflow CLI Module
//!
//! This module implements the CLI interface for Storyflow.
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `init` - Initialize a new database and secret key
//! - `projects` - List, create, show, update, delete and purge projects
//! - `stage` - Read and edit stages and their version history
//! - `generate` - Generate a stage with the configured endpoint
//! - `settings` - Manage generation settings
//! - `prompts` - Manage per-stage prompt templates
//! - `export` - Export a project to a file
//! - `import` - Import a project archive

mod commands;

use crate::config::AppConfig;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use storyflow_core::StoryflowError;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Storyflow - staged content pipeline
///
/// Drives a project from idea to motion prompts, one versioned stage at a time.
#[derive(Parser, Debug)]
#[command(name = "storyflow")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite database (overrides config and environment)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Initialize a new database
    Init {
        /// Remove an existing database first
        #[arg(short, long)]
        force: bool,
    },

    /// Manage projects
    #[command(subcommand)]
    Projects(ProjectsCommand),

    /// Read and edit stages
    #[command(subcommand)]
    Stage(StageCommand),

    /// Generate a stage's content
    Generate(GenerateArgs),

    /// Manage generation settings
    #[command(subcommand)]
    Settings(SettingsCommand),

    /// Manage prompt templates
    #[command(subcommand)]
    Prompts(PromptsCommand),

    /// Export a project
    Export {
        /// Project ID
        project: i64,

        /// Export kind (markdown, fountain, storyboard, prompts, bundle, archive)
        #[arg(short = 't', long, default_value = "markdown")]
        kind: String,

        /// Output file path (defaults to a name derived from the project)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import a project archive as a new project
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },
}

/// `storyflow projects ...`
#[derive(Subcommand, Debug)]
pub enum ProjectsCommand {
    /// List live projects, most recently updated first
    List {
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "20")]
        page_size: u32,
        /// Filter by name or description
        #[arg(short, long)]
        search: Option<String>,
    },
    /// Create a project with its eight stages
    Create {
        name: String,
        #[arg(short, long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        category: String,
        /// Comma-separated tags
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,
    },
    /// Show a project and its stages
    Show { id: i64 },
    /// Update project fields
    Update {
        id: i64,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(long)]
        category: Option<String>,
        /// Comma-separated tags (replaces the current set)
        #[arg(short, long, value_delimiter = ',')]
        tags: Option<Vec<String>>,
    },
    /// Soft-delete a project
    Delete { id: i64 },
    /// Permanently remove a project and everything it owns
    Purge { id: i64 },
}

/// `storyflow stage ...`
#[derive(Subcommand, Debug)]
pub enum StageCommand {
    /// Show one stage
    Show { project: i64, stage: String },
    /// Replace a stage's content
    Set {
        project: i64,
        stage: String,
        /// New content
        #[arg(short, long, conflicts_with = "file")]
        content: Option<String>,
        /// Read the new content from a file
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Force a status (locked, unlocked, in_progress, completed)
        #[arg(short, long)]
        status: Option<String>,
    },
    /// Mark a stage completed
    Complete { project: i64, stage: String },
    /// Show the prompt context a generation would receive
    Context { project: i64, stage: String },
    /// List versions, newest first
    Versions { project: i64, stage: String },
    /// Restore a previous version's content
    Restore {
        project: i64,
        stage: String,
        version: i64,
    },
    /// Set or clear a version label
    Label {
        project: i64,
        stage: String,
        version: i64,
        /// Omit to clear the label
        label: Option<String>,
    },
    /// Delete a version (numbers are never reused)
    DeleteVersion {
        project: i64,
        stage: String,
        version: i64,
    },
}

/// `storyflow generate ...`
#[derive(Args, Debug)]
pub struct GenerateArgs {
    pub project: i64,
    pub stage: String,
    /// Settings ID (defaults to the default settings)
    #[arg(short, long)]
    pub settings: Option<i64>,
    /// File holding a prompt template used instead of the stored one
    #[arg(long)]
    pub prompt_file: Option<PathBuf>,
    #[arg(long)]
    pub temperature: Option<f64>,
    #[arg(long)]
    pub max_tokens: Option<u32>,
    /// Print tokens as they arrive
    #[arg(long)]
    pub stream: bool,
}

/// `storyflow settings ...`
#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    /// List active settings, default first
    List,
    /// Add settings
    Add {
        name: String,
        #[arg(long, default_value = "openai")]
        provider: String,
        #[arg(long, default_value = "https://api.openai.com/v1")]
        base_url: String,
        #[arg(short, long, default_value = "gpt-4")]
        model: String,
        #[arg(long, default_value = "0.7")]
        temperature: f64,
        #[arg(long, default_value = "1.0")]
        top_p: f64,
        #[arg(long, default_value = "4096")]
        max_tokens: u32,
        /// Make these the default settings
        #[arg(long)]
        default: bool,
        /// API key (or set STORYFLOW_PROVIDER_API_KEY)
        #[arg(
            long,
            env = "STORYFLOW_PROVIDER_API_KEY",
            hide_env_values = true,
            default_value = ""
        )]
        api_key: String,
    },
    /// Update settings fields
    Update {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        base_url: Option<String>,
        #[arg(short, long)]
        model: Option<String>,
        #[arg(long)]
        temperature: Option<f64>,
        #[arg(long)]
        top_p: Option<f64>,
        #[arg(long)]
        max_tokens: Option<u32>,
        #[arg(long)]
        default: Option<bool>,
        #[arg(long)]
        active: Option<bool>,
        #[arg(long)]
        api_key: Option<String>,
    },
    /// Remove settings
    Remove { id: i64 },
    /// Test the connection of a settings row
    Test { id: i64 },
}

/// `storyflow prompts ...`
#[derive(Subcommand, Debug)]
pub enum PromptsCommand {
    /// List all templates
    List,
    /// Show one template
    Show { stage: String },
    /// Replace a template with a file's content
    Set { stage: String, file: PathBuf },
    /// Restore the built-in template
    Reset { stage: String },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Resolve configuration: file and environment, then CLI flags.
pub fn resolve_config(cli: &Cli) -> Result<AppConfig, StoryflowError> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(database) = &cli.database {
        config.database = database.clone();
    }
    Ok(config)
}

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), StoryflowError> {
    let mut config = resolve_config(&cli)?;
    if cli.verbose {
        tracing::debug!(config = ?config, "Resolved configuration");
    }
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Server { host, port }) => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            cmd_server(config).await
        }
        Some(Commands::Init { force }) => cmd_init(&config, force, json_mode),
        Some(Commands::Projects(command)) => cmd_projects(&config, command, json_mode),
        Some(Commands::Stage(command)) => cmd_stage(&config, command, json_mode),
        Some(Commands::Generate(args)) => cmd_generate(&config, args, json_mode).await,
        Some(Commands::Settings(command)) => cmd_settings(&config, command, json_mode).await,
        Some(Commands::Prompts(command)) => cmd_prompts(&config, command, json_mode),
        Some(Commands::Export {
            project,
            kind,
            output,
        }) => cmd_export(&config, project, &kind, output.as_deref(), json_mode),
        Some(Commands::Import { input }) => cmd_import(&config, &input, json_mode),
        None => {
            // No subcommand - list projects by default
            cmd_projects(
                &config,
                ProjectsCommand::List {
                    page: 1,
                    page_size: 20,
                    search: None,
                },
                json_mode,
            )
        }
    }
}
