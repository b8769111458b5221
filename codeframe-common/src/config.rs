//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application name used for config and data directories
pub const APP_DIR_NAME: &str = "codeframe";

/// TOML configuration file contents
///
/// Every field is optional; missing values fall back to environment
/// variables or compiled defaults during resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub port: Option<u16>,
    pub logging: LoggingConfig,
    pub services: ServicesConfig,
    pub generation: GenerationConfig,
    pub mece: MeceConfig,
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// EnvFilter directive used when RUST_LOG is not set
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "codeframe_engine=info,codeframe_common=info,tower_http=info".to_string(),
        }
    }
}

/// `[services]` section: external collaborator endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub embedding_url: Option<String>,
    pub clustering_url: Option<String>,
    pub hierarchy_url: Option<String>,
    pub mece_url: Option<String>,
    pub embedding_model: Option<String>,
    pub embedding_timeout_secs: Option<u64>,
    pub clustering_timeout_secs: Option<u64>,
    pub proposal_timeout_secs: Option<u64>,
    pub mece_timeout_secs: Option<u64>,
    /// Hierarchy proposal calls per second
    pub proposal_rate_per_second: Option<u32>,
}

/// `[generation]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub min_answers: Option<usize>,
    pub seconds_per_cluster: Option<u64>,
    pub workers_per_generation: Option<usize>,
    pub max_job_attempts: Option<u32>,
}

/// `[mece]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeceConfig {
    pub overlap_threshold: Option<f32>,
    pub gap_threshold: Option<f32>,
}

/// Load a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load the config file at `explicit`, or the platform default if it exists.
///
/// A missing default file is not an error (empty config); a missing
/// explicit file is.
pub fn load_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    if let Some(path) = explicit {
        return load_toml_config(path);
    }

    match default_config_path() {
        Some(path) if path.exists() => {
            tracing::info!("Loading config file: {}", path.display());
            load_toml_config(&path)
        }
        _ => Ok(TomlConfig::default()),
    }
}

/// Platform config file location (`~/.config/codeframe/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("config.toml"))
}

/// Root folder resolution, priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent default (fallback)
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    config: &TomlConfig,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("./codeframe_data"))
}

/// Database file inside the root folder
pub fn database_path(root_folder: &Path) -> PathBuf {
    root_folder.join("codeframe.db")
}
