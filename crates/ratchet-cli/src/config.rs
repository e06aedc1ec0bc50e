//! Configuration file management for ratchet.
//!
//! Provides a TOML-based config file at `~/.config/ratchet/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use ratchet_core::LoopConfig;
use ratchet_store::StoreConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub store: StoreSection,
    #[serde(rename = "loop")]
    pub loop_config: LoopConfig,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Snapshot file; the platform data directory is used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the ratchet config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/ratchet` or `~/.config/ratchet`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("ratchet");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("ratchet")
}

/// Return the path to the ratchet config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse a config file. Returns an error if it does not exist.
pub fn load_config_from(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    Ok(path)
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Settings that can be given on the `ratchet run` command line.
#[derive(Debug, Default, Clone)]
pub struct RunOverrides {
    pub max_concurrent: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub max_iterations: Option<u32>,
    pub target_confidence: Option<f64>,
    pub state_file: Option<PathBuf>,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct RatchetConfig {
    pub loop_config: LoopConfig,
    pub store: StoreConfig,
}

impl RatchetConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// Recognised variables: `RATCHET_MAX_CONCURRENT_TASKS`,
    /// `RATCHET_TASK_TIMEOUT_SECS`, `RATCHET_RETRY_ATTEMPTS`,
    /// `RATCHET_MAX_ITERATIONS`, `RATCHET_TARGET_CONFIDENCE`,
    /// `RATCHET_STATE_FILE`. A missing config file is not an error; a
    /// malformed one is.
    pub fn resolve(flags: &RunOverrides) -> Result<Self> {
        let path = config_path();
        let file_config = if path.exists() {
            load_config_from(&path)?
        } else {
            ConfigFile::default()
        };
        Self::resolve_with(file_config, flags)
    }

    pub fn resolve_with(file_config: ConfigFile, flags: &RunOverrides) -> Result<Self> {
        let mut loop_config = file_config.loop_config;
        let orchestrator = &mut loop_config.orchestrator;

        if let Some(n) = flag_or_env(flags.max_concurrent, "RATCHET_MAX_CONCURRENT_TASKS")? {
            orchestrator.max_concurrent_tasks = n;
        }
        if let Some(secs) = flag_or_env(flags.timeout_secs, "RATCHET_TASK_TIMEOUT_SECS")? {
            orchestrator.task_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = flag_or_env(flags.retry_attempts, "RATCHET_RETRY_ATTEMPTS")? {
            orchestrator.retry_attempts = n;
        }
        if let Some(n) = flag_or_env(flags.max_iterations, "RATCHET_MAX_ITERATIONS")? {
            loop_config.max_iterations = n;
        }
        if let Some(score) = flag_or_env(flags.target_confidence, "RATCHET_TARGET_CONFIDENCE")? {
            loop_config.target_confidence_score = score;
        }

        loop_config.validate()?;

        let store = if let Some(path) = &flags.state_file {
            StoreConfig::new(path)
        } else if let Some(path) = std::env::var_os("RATCHET_STATE_FILE").filter(|v| !v.is_empty()) {
            StoreConfig::new(path)
        } else if let Some(path) = file_config.store.state_file {
            StoreConfig::new(path)
        } else {
            StoreConfig::new(StoreConfig::default_path())
        };

        Ok(Self { loop_config, store })
    }
}

/// The flag value when given; otherwise the parsed environment variable.
/// The variable is not read at all when the flag is set.
fn flag_or_env<T>(flag: Option<T>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(value) = flag {
        Ok(Some(value))
    } else {
        env_parse(name)
    }
}

/// Read and parse an environment variable; unset or empty is `None`.
fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{name} env var is not valid: {value:?}")),
        _ => Ok(None),
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
