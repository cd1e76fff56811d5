use anyhow::{Context, Result};
use rollcall_core::gallery::DEFAULT_DESCRIPTOR_DIM;
use rollcall_core::matcher::DEFAULT_MATCH_THRESHOLD;
use rollcall_core::session::DEFAULT_IDLE_TIMEOUT_SECS;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Optional settings file (`config.toml`). Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub db_path: Option<PathBuf>,
    pub export_dir: Option<PathBuf>,
    pub match_threshold: Option<f64>,
    pub idle_timeout_secs: Option<u64>,
    pub descriptor_dim: Option<usize>,
}

/// Resolved configuration: defaults, then the config file, then `ROLLCALL_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite attendance database.
    pub db_path: PathBuf,
    /// Directory CSV exports are written to.
    pub export_dir: PathBuf,
    /// Maximum Euclidean distance (exclusive) for a positive match.
    pub match_threshold: f64,
    /// Seconds without any face before a session ends on its own.
    pub idle_timeout_secs: u64,
    /// Descriptor dimensionality produced by the encoder.
    pub descriptor_dim: usize,
}

impl Config {
    /// Load the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let path = env("ROLLCALL_CONFIG")
            .map(PathBuf::from)
            .or_else(|| config_dir(&env).map(|dir| dir.join("config.toml")));

        let file = match path {
            Some(path) if path.exists() => read_file(&path)?,
            _ => FileConfig::default(),
        };
        Ok(Self::resolve(file, env))
    }

    /// Merge file settings with variables from `env`.
    pub fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = env("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| data_dir(&env).join("attendance.db"));

        let export_dir = env("ROLLCALL_EXPORT_DIR")
            .map(PathBuf::from)
            .or(file.export_dir)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            db_path,
            export_dir,
            match_threshold: parsed(&env, "ROLLCALL_MATCH_THRESHOLD")
                .or(file.match_threshold)
                .unwrap_or(DEFAULT_MATCH_THRESHOLD),
            idle_timeout_secs: parsed(&env, "ROLLCALL_IDLE_TIMEOUT_SECS")
                .or(file.idle_timeout_secs)
                .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS),
            descriptor_dim: parsed(&env, "ROLLCALL_DESCRIPTOR_DIM")
                .or(file.descriptor_dim)
                .unwrap_or(DEFAULT_DESCRIPTOR_DIM),
        }
    }
}

fn read_file(path: &Path) -> Result<FileConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let file = toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))?;
    tracing::debug!(path = %path.display(), "loaded config file");
    Ok(file)
}

fn parsed<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}

fn home(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    PathBuf::from(env("HOME").unwrap_or_else(|| "/tmp".to_string()))
}

fn data_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| home(env).join(".local/share"))
        .join("rollcall")
}

fn config_dir(env: &impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    let base = env("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    Some(base.join("rollcall"))
}
