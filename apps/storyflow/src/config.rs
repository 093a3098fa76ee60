//! # Configuration
//!
//! Layered service configuration:
//!
//! 1. built-in defaults
//! 2. optional TOML file (`--config`)
//! 3. `STORYFLOW_*` environment variables
//! 4. CLI flags (applied by the caller)
//!
//! ## Environment Variables
//!
//! - `STORYFLOW_DATABASE`: path of the SQLite database file
//! - `STORYFLOW_HOST` / `STORYFLOW_PORT`: bind address of the HTTP server
//! - `STORYFLOW_API_KEY`: if set, requires Bearer token authentication
//! - `STORYFLOW_CORS_ORIGINS`: comma-separated origins, or "*" for all
//! - `STORYFLOW_RATE_LIMIT`: requests per minute (default: 60, 0 to disable)
//! - `STORYFLOW_AI_RATE_LIMIT`: generation requests per minute (default: 10, 0 to disable)
//! - `STORYFLOW_SECRET_KEY`: secret protecting stored API keys
//! - `STORYFLOW_SECRET_KEY_FILE`: where the secret is kept when not given directly
//! - `STORYFLOW_REQUEST_TIMEOUT_SECS`: generator connect and read timeout (default: 120)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use storyflow_core::{SecretBox, StoryflowError};

/// Prefix shared by every environment variable the service reads.
pub const ENV_PREFIX: &str = "STORYFLOW_";

/// Default generation request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// APP CONFIG
// =============================================================================

/// Resolved service configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub database: PathBuf,
    pub host: String,
    pub port: u16,
    /// Bearer key required by the HTTP API; `None` disables auth.
    pub api_key: Option<String>,
    /// `None` means localhost only.
    pub cors_origins: Option<String>,
    /// Requests per minute across the whole API.
    pub rate_limit: u32,
    /// Requests per minute on the generation endpoints.
    pub ai_rate_limit: u32,
    pub secret_key: Option<String>,
    pub secret_key_file: Option<PathBuf>,
    pub request_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("storyflow.db"),
            host: "127.0.0.1".to_string(),
            port: 8080,
            api_key: None,
            cors_origins: None,
            rate_limit: 60,
            ai_rate_limit: 10,
            secret_key: None,
            secret_key_file: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("database", &self.database)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("cors_origins", &self.cors_origins)
            .field("rate_limit", &self.rate_limit)
            .field("ai_rate_limit", &self.ai_rate_limit)
            .field(
                "secret_key",
                &self.secret_key.as_ref().map(|_| "<redacted>"),
            )
            .field("secret_key_file", &self.secret_key_file)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl AppConfig {
    /// Defaults, then the TOML file (if any), then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, StoryflowError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    StoryflowError::ConfigurationError(format!(
                        "Cannot read config file '{}': {}",
                        path.display(),
                        e
                    ))
                })?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML document; absent keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, StoryflowError> {
        toml::from_str(text)
            .map_err(|e| StoryflowError::ConfigurationError(format!("Invalid config file: {}", e)))
    }

    /// Overlay `STORYFLOW_*` variables read through `lookup`.
    ///
    /// Empty values are ignored. Unparseable numbers are a `ConfigurationError`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), StoryflowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            let value = lookup(&format!("{}{}", ENV_PREFIX, name))?;
            (!value.is_empty()).then_some(value)
        };

        if let Some(v) = var("DATABASE") {
            self.database = PathBuf::from(v);
        }
        if let Some(v) = var("HOST") {
            self.host = v;
        }
        if let Some(v) = var("PORT") {
            self.port = parse_number("PORT", &v)?;
        }
        if let Some(v) = var("API_KEY") {
            self.api_key = Some(v);
        }
        if let Some(v) = var("CORS_ORIGINS") {
            self.cors_origins = Some(v);
        }
        if let Some(v) = var("RATE_LIMIT") {
            self.rate_limit = parse_number("RATE_LIMIT", &v)?;
        }
        if let Some(v) = var("AI_RATE_LIMIT") {
            self.ai_rate_limit = parse_number("AI_RATE_LIMIT", &v)?;
        }
        if let Some(v) = var("SECRET_KEY") {
            self.secret_key = Some(v);
        }
        if let Some(v) = var("SECRET_KEY_FILE") {
            self.secret_key_file = Some(PathBuf::from(v));
        }
        if let Some(v) = var("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_number("REQUEST_TIMEOUT_SECS", &v)?;
        }
        Ok(())
    }

    /// `host:port` for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// The bearer key, if authentication is enabled.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty())
    }

    /// Location of the generated secret when none is configured directly.
    pub fn key_file_path(&self) -> PathBuf {
        self.secret_key_file
            .clone()
            .unwrap_or_else(|| self.database.with_extension("key"))
    }

    /// Build the secret box protecting stored API keys.
    ///
    /// Uses `secret_key` when set. Otherwise reads the key file, creating it
    /// with a fresh random secret on first use.
    pub fn secret_box(&self) -> Result<SecretBox, StoryflowError> {
        if let Some(secret) = self.secret_key.as_deref().filter(|s| !s.is_empty()) {
            return Ok(SecretBox::new(secret));
        }

        let path = self.key_file_path();
        if path.exists() {
            let secret = std::fs::read_to_string(&path)?;
            let secret = secret.trim();
            if secret.is_empty() {
                return Err(StoryflowError::ConfigurationError(format!(
                    "Secret key file '{}' is empty",
                    path.display()
                )));
            }
            return Ok(SecretBox::new(secret));
        }

        let secret = SecretBox::generate_secret();
        write_key_file(&path, &secret)?;
        tracing::info!(path = %path.display(), "Generated new secret key file");
        Ok(SecretBox::new(&secret))
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, StoryflowError> {
    value.trim().parse().map_err(|_| {
        StoryflowError::ConfigurationError(format!(
            "{}{} must be a non-negative integer, got '{}'",
            ENV_PREFIX, name, value
        ))
    })
}

#[cfg(unix)]
fn write_key_file(path: &Path, secret: &str) -> Result<(), StoryflowError> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(secret.as_bytes())?;
    Ok(())
}

#[cfg(not(unix))]
fn write_key_file(path: &Path, secret: &str) -> Result<(), StoryflowError> {
    std::fs::write(path, secret)?;
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
