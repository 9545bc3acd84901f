//! Configuration management
//!
//! Settings are resolved in this order (later wins):
//! 1. Defaults
//! 2. `chat-memory.toml`
//! 3. `chat-memory.<APP_PROFILE>.toml`, when `APP_PROFILE` is set
//! 4. Environment variables
//!
//! `${VAR_NAME}` inside a config file is replaced by the environment value.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::Error;
use crate::store::DEFAULT_RETENTION_LIMIT;

/// Base config file name
pub const CONFIG_FILE: &str = "chat-memory.toml";

/// Main configuration for chat-memory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,

    #[serde(default)]
    pub db: DbConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root data directory
    #[serde(default = "default_app_dir")]
    pub dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            dir: default_app_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Database file stem, stored as `<app.dir>/db/<file>.sqlite`
    #[serde(default = "default_db_file")]
    pub file: String,

    /// Full database path; overrides `app.dir` and `file` when set
    #[serde(default)]
    pub path: Option<String>,

    /// Messages kept per user
    #[serde(default = "default_retention_limit")]
    pub retention_limit: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            file: default_db_file(),
            path: None,
            retention_limit: default_retention_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_app_dir() -> String {
    "data".to_string()
}

fn default_db_file() -> String {
    "chat_messages".to_string()
}

fn default_retention_limit() -> usize {
    DEFAULT_RETENTION_LIMIT
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Replace `${VAR_NAME}` with the environment value (empty when unset)
    fn expand_env_vars(value: &str) -> String {
        let mut result = String::new();
        let mut chars = value.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next();

                let mut var_name = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    var_name.push(c);
                }

                if let Ok(env_value) = std::env::var(&var_name) {
                    result.push_str(&env_value);
                }
            } else {
                result.push(c);
            }
        }

        result
    }

    fn parse_toml(content: &str) -> crate::Result<TomlConfig> {
        let expanded = Self::expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
    }

    fn read_toml(path: &Path) -> crate::Result<TomlConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string (no environment overrides)
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let mut cfg = Self::default();
        Self::parse_toml(content)?.apply_to(&mut cfg);
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a TOML file, then apply environment overrides
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let mut cfg = Self::default();
        Self::read_toml(path.as_ref())?.apply_to(&mut cfg);
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from the working directory.
    ///
    /// Reads `.env`, `chat-memory.toml`, the `APP_PROFILE` overlay, then
    /// environment overrides. Missing files are skipped.
    pub fn load() -> crate::Result<Self> {
        dotenvy::dotenv().ok();
        let profile = std::env::var("APP_PROFILE").ok().filter(|p| !p.is_empty());
        Self::load_from_dir(Path::new("."), profile.as_deref())
    }

    /// Load `chat-memory.toml` and its profile overlay from `dir`
    pub fn load_from_dir(dir: &Path, profile: Option<&str>) -> crate::Result<Self> {
        let mut cfg = Self::default();

        let base = dir.join(CONFIG_FILE);
        if base.exists() {
            Self::read_toml(&base)?.apply_to(&mut cfg);
        }

        if let Some(profile) = profile {
            let overlay = dir.join(format!("chat-memory.{}.toml", profile));
            if overlay.exists() {
                Self::read_toml(&overlay)?.apply_to(&mut cfg);
            }
        }

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Configuration from defaults and environment only
    pub fn from_env() -> crate::Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `CHAT_MEMORY_*` overrides read through `lookup`
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(dir) = var("CHAT_MEMORY_DIR") {
            self.app.dir = dir;
        }
        if let Some(file) = var("CHAT_MEMORY_DB_FILE") {
            self.db.file = file;
        }
        if let Some(path) = var("CHAT_MEMORY_DB_PATH") {
            self.db.path = Some(path);
        }
        if let Some(limit) = var("CHAT_MEMORY_RETENTION") {
            match limit.parse() {
                Ok(limit) => self.db.retention_limit = limit,
                Err(_) => warn!(
                    "Ignoring CHAT_MEMORY_RETENTION={:?}: not a number, keeping {}",
                    limit, self.db.retention_limit
                ),
            }
        }
        if let Some(level) = var("CHAT_MEMORY_LOG_LEVEL") {
            self.log.level = level;
        }
    }

    fn validate(&self) -> crate::Result<()> {
        if self.db.retention_limit == 0 {
            return Err(Error::Config(
                "db.retention_limit must be at least 1".to_string(),
            ));
        }
        if self.db.path.is_none() && self.db.file.is_empty() {
            return Err(Error::Config("db.file must not be empty".to_string()));
        }
        Ok(())
    }

    /// Directory holding the database when no explicit path is set
    pub fn db_dir(&self) -> PathBuf {
        Path::new(&self.app.dir).join("db")
    }

    /// Effective database file path
    pub fn db_path(&self) -> PathBuf {
        match &self.db.path {
            Some(path) => PathBuf::from(path),
            None => self.db_dir().join(format!("{}.sqlite", self.db.file)),
        }
    }
}

// ============================================================================
// TOML file layout (every key optional so overlays can be partial)
// ============================================================================

#[derive(Debug, Deserialize, Default)]
struct TomlConfig {
    app: Option<TomlAppConfig>,
    db: Option<TomlDbConfig>,
    log: Option<TomlLogConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlAppConfig {
    dir: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlDbConfig {
    file: Option<String>,
    path: Option<String>,
    retention_limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlLogConfig {
    level: Option<String>,
}

impl TomlConfig {
    /// Overwrite the keys present in this file
    fn apply_to(self, cfg: &mut Config) {
        if let Some(app) = self.app {
            if let Some(dir) = app.dir {
                cfg.app.dir = dir;
            }
        }
        if let Some(db) = self.db {
            if let Some(file) = db.file {
                cfg.db.file = file;
            }
            if db.path.is_some() {
                cfg.db.path = db.path;
            }
            if let Some(limit) = db.retention_limit {
                cfg.db.retention_limit = limit;
            }
        }
        if let Some(log) = self.log {
            if let Some(level) = log.level {
                cfg.log.level = level;
            }
        }
    }
}
