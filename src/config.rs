//! Configuration for lectern.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (LECTERN_HOME, LECTERN_DB)
//! 2. Config file (.lectern/config.yaml)
//! 3. Defaults (~/.lectern)
//!
//! Config file discovery searches the current directory and its parents
//! for .lectern/config.yaml; relative paths in the file resolve against
//! the .lectern directory.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::rest::RestConfig;
use crate::ingest::SegmenterConfig;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub segmenter: Option<SegmenterConfig>,
    #[serde(default)]
    pub sync: Option<SyncConfig>,
    #[serde(default)]
    pub remote: Option<RestConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .lectern/)
    pub home: Option<String>,
    /// Local store path (relative to .lectern/)
    pub db: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub max_retries: Option<u32>,
    pub retention_days: Option<i64>,
}

/// Resolved sync settings
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Replay attempts before a queue entry is dropped
    pub max_retries: u32,
    /// Days to keep synced records before GC
    pub retention_days: i64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retention_days: 7,
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to lectern home (engine state)
    pub home: PathBuf,
    /// Absolute path to the local store
    pub db_path: PathBuf,
    /// Segmenter tuning
    pub segmenter: SegmenterConfig,
    /// Sync tuning
    pub sync: SyncSettings,
    /// Remote document API, if configured
    pub remote: Option<RestConfig>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".lectern").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".lectern");

    let config_file = find_config_file();

    let (home, db_path, segmenter, sync, remote) = if let Some(ref config_path) = config_file {
        let config = load_config_file(config_path)?;
        let lectern_dir = config_path.parent().unwrap_or(Path::new("."));

        let home = if let Ok(env_home) = std::env::var("LECTERN_HOME") {
            PathBuf::from(env_home)
        } else if let Some(ref home_path) = config.paths.home {
            resolve_path(lectern_dir, home_path)
        } else {
            default_home.clone()
        };

        let db_path = if let Ok(env_db) = std::env::var("LECTERN_DB") {
            PathBuf::from(env_db)
        } else if let Some(ref db) = config.paths.db {
            resolve_path(lectern_dir, db)
        } else {
            home.join("lectern.db")
        };

        let segmenter = config.segmenter.unwrap_or_default();

        let sync = SyncSettings {
            max_retries: config
                .sync
                .as_ref()
                .and_then(|s| s.max_retries)
                .unwrap_or(3),
            retention_days: config
                .sync
                .as_ref()
                .and_then(|s| s.retention_days)
                .unwrap_or(7),
        };

        (home, db_path, segmenter, sync, config.remote)
    } else {
        let home = std::env::var("LECTERN_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_home.clone());

        let db_path = std::env::var("LECTERN_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join("lectern.db"));

        (
            home,
            db_path,
            SegmenterConfig::default(),
            SyncSettings::default(),
            None,
        )
    };

    Ok(ResolvedConfig {
        home,
        db_path,
        segmenter,
        sync,
        remote,
        config_file,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the lectern home directory (engine state)
pub fn lectern_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the local store path
pub fn db_path() -> Result<PathBuf> {
    Ok(config()?.db_path.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let lectern_dir = temp.path().join(".lectern");
        std::fs::create_dir_all(&lectern_dir).unwrap();

        let config_path = lectern_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: ./
  db: ./state.db
segmenter:
  debounce_secs: 5
sync:
  max_retries: 5
  retention_days: 14
remote:
  base_url: https://docs.example.com
  token: TOKEN
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.paths.db, Some("./state.db".to_string()));
        assert_eq!(config.segmenter.unwrap().debounce_secs, 5);

        let sync = config.sync.unwrap();
        assert_eq!(sync.max_retries, Some(5));
        assert_eq!(sync.retention_days, Some(14));
        assert_eq!(
            config.remote.unwrap().base_url,
            "https://docs.example.com".to_string()
        );
    }

    #[test]
    fn test_defaults_without_overrides() {
        let settings = SyncSettings::default();
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.retention_days, 7);
        assert_eq!(SegmenterConfig::default().debounce_secs, 2);
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project/.lectern");

        assert_eq!(
            resolve_path(&base, "./state.db"),
            PathBuf::from("/home/user/project/.lectern/state.db")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path.db"),
            PathBuf::from("/absolute/path.db")
        );
    }
}
