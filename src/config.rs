//! TOML configuration.
//!
//! Every path the crate touches (the SQLite database, the knowledge-point
//! content directory, the optional sync report) is read from a single
//! config file and passed explicitly into the components that need it.
//!
//! ```toml
//! [db]
//! path = "./data/points.sqlite"
//!
//! [content]
//! dir = "./shuju/points"
//! extension = "txt"
//!
//! [sync]
//! timeout_secs = 30
//! report_path = "./reports/import-blocks-summary.json"
//!
//! [server]
//! bind = "127.0.0.1:7341"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub content: ContentConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContentConfig {
    /// Flat directory holding one document per topic code.
    pub dir: PathBuf,
    /// Document file extension, without the leading dot.
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Glob patterns (matched against the file name) to ignore.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_extension() -> String {
    "txt".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Upper bound for a single code during `sync --all`.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            report_path: None,
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    /// Config rooted at `base`, with the database and content directory
    /// laid out underneath it. Used by tests and for quick local runs.
    pub fn rooted_at(base: &Path) -> Self {
        Self {
            db: DbConfig {
                path: base.join("data").join("points.sqlite"),
            },
            content: ContentConfig {
                dir: base.join("points"),
                extension: default_extension(),
                exclude_globs: Vec::new(),
            },
            sync: SyncConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.content.extension.trim().is_empty() {
        anyhow::bail!("content.extension must not be empty");
    }
    if config.content.extension.starts_with('.') {
        anyhow::bail!(
            "content.extension must not start with '.': got '{}'",
            config.content.extension
        );
    }

    if config.sync.timeout_secs == 0 {
        anyhow::bail!("sync.timeout_secs must be > 0");
    }

    Ok(config)
}
