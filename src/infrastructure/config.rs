//! Configuration infrastructure
//!
//! Settings live in a single JSON file. Missing fields fall back to the
//! values in [`defaults`]; a file that is not valid JSON for this schema is a
//! fatal error and is never overwritten.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::info;

/// Fatal configuration problems; the pipeline never starts when one occurs
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown site '{name}' (supported: {})", supported.join(", "))]
    UnknownSite {
        name: String,
        supported: Vec<&'static str>,
    },

    #[error("Failed to access configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed configuration file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Site profile identifier, e.g. "mercadolibre" or "amazon"
    pub site: String,

    /// Overrides the site profile's built-in seed URL
    pub seed_url: Option<String>,

    /// Number of listing pages the seed stage generates
    pub pages_to_crawl: u32,

    /// Root directory for the store, documents and logs
    pub data_dir: PathBuf,

    pub database_file: String,
    pub listing_dir: String,
    pub detail_dir: String,

    pub renderer: RendererConfig,
    pub pacing: PacingConfig,
    pub logging: LoggingConfig,
}

/// Rendering collaborator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Per-attempt timeout
    pub timeout_secs: u64,
    /// Attempts per claimed job before it is recorded as failed
    pub max_attempts: u32,
    /// First backoff delay; doubles on every further attempt
    pub backoff_base_ms: u64,
    /// Trigger lazy-loaded content before capturing
    pub scroll: bool,
    /// One of these is picked per renderer instance
    pub user_agents: Vec<String>,
}

/// Randomised delays between successful iterations of a fetch stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub enabled: bool,
    pub normal_min_secs: u64,
    pub normal_max_secs: u64,
    pub periodic_min_secs: u64,
    pub periodic_max_secs: u64,
    /// Every Nth success uses the periodic range; 0 disables it
    pub periodic_every: u32,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted file logs
    pub json_format: bool,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output
    pub file_output: bool,

    /// Sub-directory of `data_dir` holding the log files
    pub log_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            site: defaults::SITE.to_string(),
            seed_url: None,
            pages_to_crawl: defaults::PAGES_TO_CRAWL,
            data_dir: defaults::data_dir(),
            database_file: defaults::DATABASE_FILE.to_string(),
            listing_dir: defaults::LISTING_DIR.to_string(),
            detail_dir: defaults::DETAIL_DIR.to_string(),
            renderer: RendererConfig::default(),
            pacing: PacingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            timeout_secs: defaults::RENDER_TIMEOUT_SECONDS,
            max_attempts: defaults::RENDER_MAX_ATTEMPTS,
            backoff_base_ms: defaults::RENDER_BACKOFF_BASE_MS,
            scroll: true,
            user_agents: defaults::USER_AGENTS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            normal_min_secs: defaults::PACING_NORMAL_MIN_SECS,
            normal_max_secs: defaults::PACING_NORMAL_MAX_SECS,
            periodic_min_secs: defaults::PACING_PERIODIC_MIN_SECS,
            periodic_max_secs: defaults::PACING_PERIODIC_MAX_SECS,
            periodic_every: defaults::PACING_PERIODIC_EVERY,
        }
    }
}

impl PacingConfig {
    /// No delays at all; used by parse stages and tests
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            file_output: true,
            log_dir: defaults::LOG_DIR.to_string(),
        }
    }
}

impl AppConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn listing_path(&self) -> PathBuf {
        self.data_dir.join(&self.listing_dir)
    }

    pub fn detail_path(&self) -> PathBuf {
        self.data_dir.join(&self.detail_dir)
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(&self.logging.log_dir)
    }

    /// Rejects values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.site.trim().is_empty() {
            return Err(ConfigError::Invalid("site must not be empty".to_string()));
        }
        if self.pages_to_crawl == 0 {
            return Err(ConfigError::Invalid(
                "pages_to_crawl must be at least 1".to_string(),
            ));
        }
        if self.renderer.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "renderer.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.renderer.user_agents.is_empty() {
            return Err(ConfigError::Invalid(
                "renderer.user_agents must list at least one user agent".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads and saves [`AppConfig`]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Loads the configuration file, writing the defaults on first run
    pub async fn load_or_init(&self) -> Result<AppConfig, ConfigError> {
        if !fs::try_exists(&self.config_path)
            .await
            .map_err(|source| self.io_error(source))?
        {
            info!(path = %self.config_path.display(), "Configuration file not found, writing defaults");
            let config = AppConfig::default();
            self.save(&config).await?;
            return Ok(config);
        }

        let content = fs::read_to_string(&self.config_path)
            .await
            .map_err(|source| self.io_error(source))?;
        let config: AppConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Malformed {
                path: self.config_path.clone(),
                source,
            })?;

        info!(path = %self.config_path.display(), "Loaded configuration");
        Ok(config)
    }

    pub async fn save(&self, config: &AppConfig) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|source| self.io_error(source))?;
            }
        }

        let content = serde_json::to_string_pretty(config).map_err(|source| ConfigError::Malformed {
            path: self.config_path.clone(),
            source,
        })?;
        fs::write(&self.config_path, content)
            .await
            .map_err(|source| self.io_error(source))?;
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> ConfigError {
        ConfigError::Io {
            path: self.config_path.clone(),
            source,
        }
    }
}

/// Default configuration values
pub mod defaults {
    use std::path::PathBuf;

    pub const APP_DIR_NAME: &str = "catalog-harvester";
    pub const CONFIG_FILE: &str = "config.json";

    pub const SITE: &str = "mercadolibre";
    pub const PAGES_TO_CRAWL: u32 = 5;

    pub const DATABASE_FILE: &str = "harvester.sqlite";
    pub const LISTING_DIR: &str = "listings";
    pub const DETAIL_DIR: &str = "products";
    pub const LOG_DIR: &str = "logs";

    pub const RENDER_TIMEOUT_SECONDS: u64 = 30;
    pub const RENDER_MAX_ATTEMPTS: u32 = 3;
    pub const RENDER_BACKOFF_BASE_MS: u64 = 2000;

    pub const PACING_NORMAL_MIN_SECS: u64 = 30;
    pub const PACING_NORMAL_MAX_SECS: u64 = 55;
    pub const PACING_PERIODIC_MIN_SECS: u64 = 50;
    pub const PACING_PERIODIC_MAX_SECS: u64 = 90;
    pub const PACING_PERIODIC_EVERY: u32 = 5;

    pub const USER_AGENTS: &[&str] = &[
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    ];

    /// Per-user data directory, falling back to the working directory
    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|dir| dir.join(APP_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from(APP_DIR_NAME))
    }
}
