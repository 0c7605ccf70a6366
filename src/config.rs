//! Configuration management for Kotoscan.
//!
//! Settings come from an optional TOML file with environment variable
//! overrides on top. Defaults are usable out of the box except for the
//! Gemini API key, which must arrive via config or GEMINI_API_KEY.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::llm::GeminiConfig;

/// Default database filename inside the data directory.
pub const DEFAULT_DATABASE_FILENAME: &str = "kotoscan.db";

/// Subdirectory of the data directory holding uploaded images.
const UPLOADS_SUBDIR: &str = "uploads";

/// Default maximum upload size in megabytes.
const DEFAULT_MAX_UPLOAD_MB: u64 = 10;

/// Default page size for scan listings.
const DEFAULT_PAGE_SIZE: u32 = 20;

/// HTTP server bind configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename inside the data directory.
    pub database_filename: String,
    /// Database URL (overrides data_dir/database_filename if set).
    /// Supports sqlite: URLs. Set via DATABASE_URL env var or config.
    pub database_url: Option<String>,
    /// Directory for storing uploaded images.
    /// Defaults to `{data_dir}/uploads` when not set.
    pub uploads_dir: Option<PathBuf>,
    /// Maximum upload size in megabytes.
    pub max_upload_mb: u64,
    /// Default page size for scan listings.
    pub default_page_size: u32,
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Gemini gateway settings.
    pub gemini: GeminiConfig,
}

impl Default for Settings {
    fn default() -> Self {
        // Default to ~/.local/share-style data dir, falling back to the
        // home directory, then the current directory.
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kotoscan");

        Self {
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_url: None,
            uploads_dir: None,
            max_upload_mb: DEFAULT_MAX_UPLOAD_MB,
            default_page_size: DEFAULT_PAGE_SIZE,
            server: ServerConfig::default(),
            gemini: GeminiConfig::default(),
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Get the database URL, constructing from path if not explicitly set.
    pub fn database_url(&self) -> String {
        if let Some(ref url) = self.database_url {
            url.clone()
        } else {
            let path = self.data_dir.join(&self.database_filename);
            format!("sqlite:{}", path.display())
        }
    }

    /// Directory for uploaded images.
    pub fn uploads_dir(&self) -> PathBuf {
        self.uploads_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join(UPLOADS_SUBDIR))
    }

    /// Maximum upload size in bytes.
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb * 1024 * 1024
    }

    /// Create the data and uploads directories if they don't exist.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.uploads_dir())?;
        Ok(())
    }
}

/// Load settings from an optional TOML file plus environment overrides.
///
/// An explicitly given path must exist; the default location
/// (`{config_dir}/kotoscan/config.toml`) is allowed to be absent.
pub fn load_settings(
    config_path: Option<&Path>,
    data_dir_override: Option<PathBuf>,
) -> anyhow::Result<Settings> {
    let mut settings = match config_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                anyhow::anyhow!("failed to read config file {}: {}", path.display(), e)
            })?;
            toml::from_str(&raw)
                .map_err(|e| anyhow::anyhow!("invalid config file {}: {}", path.display(), e))?
        }
        None => match default_config_path() {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(&path)?;
                toml::from_str(&raw)
                    .map_err(|e| anyhow::anyhow!("invalid config file {}: {}", path.display(), e))?
            }
            _ => Settings::default(),
        },
    };

    if let Some(data_dir) = data_dir_override {
        settings.data_dir = data_dir;
    }
    apply_env_overrides(&mut settings);

    Ok(settings)
}

/// Default config file location: `{config_dir}/kotoscan/config.toml`.
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("kotoscan").join("config.toml"))
}

/// Environment variables win over the config file.
fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(url) = std::env::var("DATABASE_URL") {
        if !url.is_empty() {
            settings.database_url = Some(url);
        }
    }
    if let Ok(key) = std::env::var("GEMINI_API_KEY") {
        if !key.is_empty() {
            settings.gemini.api_key = Some(key);
        }
    }
    if let Ok(model) = std::env::var("GEMINI_MODEL") {
        if !model.is_empty() {
            settings.gemini.model = model;
        }
    }
}
