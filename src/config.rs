//! Configuration management with YAML support

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
///
/// Built once at startup and handed to the store by reference; nothing
/// mutates it afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub calendar: CalendarConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Value written to `PRAGMA foreign_keys` once the schema is current
    #[serde(default = "default_enabled")]
    pub enforce_foreign_keys: bool,
}

/// Time zone context used when legacy air dates are converted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// IANA zone assumed for shows that carry no zone of their own
    #[serde(default = "default_show_timezone")]
    pub default_show_timezone: String,

    /// Time of day (HH:MM) assumed for episodes without a release time
    #[serde(default = "default_release_time")]
    pub default_release_time: String,

    /// IANA zone of the device; `None` uses the system local zone
    #[serde(default)]
    pub device_timezone: Option<String>,
}

/// Highlight markers for search snippets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_snippet_start")]
    pub snippet_start: String,

    #[serde(default = "default_snippet_end")]
    pub snippet_end: String,

    #[serde(default = "default_snippet_ellipsis")]
    pub snippet_ellipsis: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `tracing` directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_database_path() -> String {
    "~/.local/share/watchstore/seriesdatabase.db".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_show_timezone() -> String {
    "America/New_York".to_string()
}

fn default_release_time() -> String {
    "20:00".to_string()
}

fn default_snippet_start() -> String {
    "<b>".to_string()
}

fn default_snippet_end() -> String {
    "</b>".to_string()
}

fn default_snippet_ellipsis() -> String {
    "...".to_string()
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            enforce_foreign_keys: true,
        }
    }
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            default_show_timezone: default_show_timezone(),
            default_release_time: default_release_time(),
            device_timezone: None,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            snippet_start: default_snippet_start(),
            snippet_end: default_snippet_end(),
            snippet_ellipsis: default_snippet_ellipsis(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            calendar: CalendarConfig::default(),
            search: SearchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    /// Searches in order:
    /// 1. Provided path
    /// 2. ./watchstore.yaml (current directory)
    /// 3. ~/.config/watchstore/watchstore.yaml
    pub fn load(path: &str) -> Result<Self> {
        let search_paths = vec![
            shellexpand::tilde(path).to_string(),
            "watchstore.yaml".to_string(),
            shellexpand::tilde("~/.config/watchstore/watchstore.yaml").to_string(),
        ];

        for search_path in &search_paths {
            if std::path::Path::new(search_path).exists() {
                let content = std::fs::read_to_string(search_path)
                    .with_context(|| format!("reading {}", search_path))?;
                let config: Config = serde_yaml::from_str(&content)
                    .with_context(|| format!("parsing {}", search_path))?;
                return Ok(config);
            }
        }

        // No config file found, use defaults
        Ok(Config::default())
    }

    /// Get the database path, expanding ~ to home directory
    pub fn database_path(&self) -> PathBuf {
        let expanded = shellexpand::tilde(&self.database.path).to_string();
        PathBuf::from(expanded)
    }
}
