//! # Storyflow - Staged Content Pipeline
//!
//! The main binary for Storyflow.
//!
//! This application provides:
//! - HTTP REST API server (axum-based) with streaming generation
//! - CLI interface for projects, stages, settings, prompts and exports
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                    apps/storyflow (THE BINARY)                 │
//! │                                                                │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────┐    │
//! │  │   CLI       │    │   HTTP API  │    │   Generation     │    │
//! │  │  (clap)     │    │   (axum)    │    │ (reqwest + SSE)  │    │
//! │  └──────┬──────┘    └──────┬──────┘    └────────┬─────────┘    │
//! │         │                  │                    │              │
//! │         └──────────────────┼────────────────────┘              │
//! │                            ▼                                   │
//! │                   ┌─────────────────┐                          │
//! │                   │ storyflow-core  │                          │
//! │                   │  (THE LOGIC)    │                          │
//! │                   └─────────────────┘                          │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the HTTP server
//! storyflow server --host 0.0.0.0 --port 8000
//!
//! # CLI operations
//! storyflow projects create "Night Ferry" -t drama,sea
//! storyflow stage set 1 idea -c "A ferry that never docks"
//! storyflow generate 1 story --stream
//! storyflow export 1 -t fountain
//! ```

use clap::Parser;
use storyflow::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // STORYFLOW_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("STORYFLOW_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "storyflow=info,storyflow_core=info,tower_http=debug".into());

    // Logs go to stderr so `--json-mode` output stays parseable.
    match log_format.as_str() {
        "json" => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr);
            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .init();
        }
        _ => {
            let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Storyflow startup banner.
fn print_banner() {
    eprintln!(
        r#"
  ╔═╗╔╦╗╔═╗╦═╗╦ ╦╔═╗╦  ╔═╗╦ ╦
  ╚═╗ ║ ║ ║╠╦╝╚╦╝╠╣ ║  ║ ║║║║
  ╚═╝ ╩ ╚═╝╩╚═ ╩ ╚  ╩═╝╚═╝╚╩╝

  Staged Content Pipeline v{}

  idea → story → script → character → scene → storyboard → image → motion
"#,
        env!("CARGO_PKG_VERSION")
    );
}
