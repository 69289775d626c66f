//! Configuration loading and validation.
//!
//! Loads `config.toml` from `$SEALRUN_CONFIG_PATH` or `~/.sealrun/config.toml`.
//! Environment variables override file values; file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::runner::InputOrder;

/// Default blob size ceiling: 100 MiB.
pub const DEFAULT_MAX_BLOB_SIZE: usize = 100 * 1024 * 1024;

/// An environment override whose value could not be parsed and was ignored.
///
/// Overrides are applied before logging is up, so they are reported back to
/// the caller instead of being logged on the spot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidOverride {
    /// Environment variable name.
    pub var: &'static str,
    /// Rejected value.
    pub value: String,
}

// ── Top-level config ────────────────────────────────────────────

/// Top-level configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Blob store settings.
    pub store: StoreConfig,
    /// Task runner settings.
    pub runner: RunnerConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// `path` overrides the file location; otherwise `$SEALRUN_CONFIG_PATH`
    /// or `~/.sealrun/config.toml` is used. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if no config location can be resolved.
    pub fn load(path: Option<&Path>) -> anyhow::Result<(Self, Vec<InvalidOverride>)> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path_with(|key| std::env::var(key).ok())?,
        };
        let mut config = Self::load_from_file(&path)?;
        let invalid = config.apply_overrides(|key| std::env::var(key).ok());
        Ok((config, invalid))
    }

    /// Load from a TOML file only, no env overrides.
    fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::debug!(path = %path.display(), "loading config from file");
                toml::from_str(&contents)
                    .with_context(|| format!("failed to parse config at {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config at {}: {e}",
                path.display()
            )),
        }
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or has wrongly typed values.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests never touch the process environment.
    /// Unparsable numeric values are skipped and returned.
    pub fn apply_overrides(
        &mut self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Vec<InvalidOverride> {
        let mut invalid = Vec::new();
        if let Some(v) = env("SEALRUN_STORE_ROOT") {
            self.store.root = PathBuf::from(v);
        }
        if let Some(v) = env("SEALRUN_MAX_BLOB_SIZE") {
            match v.parse() {
                Ok(n) => self.store.max_blob_size = n,
                Err(_) => invalid.push(InvalidOverride {
                    var: "SEALRUN_MAX_BLOB_SIZE",
                    value: v,
                }),
            }
        }
        if let Some(v) = env("SEALRUN_WORKSPACE_ROOT") {
            self.runner.workspace_root = PathBuf::from(v);
        }
        if let Some(v) = env("SEALRUN_TIMEOUT_SECS") {
            match v.parse() {
                Ok(n) => self.runner.timeout_secs = Some(n),
                Err(_) => invalid.push(InvalidOverride {
                    var: "SEALRUN_TIMEOUT_SECS",
                    value: v,
                }),
            }
        }
        if let Some(v) = env("SEALRUN_LOG_LEVEL") {
            self.logging.level = v;
        }
        invalid
    }
}

// ── Store config ────────────────────────────────────────────────

/// Blob store settings (`[store]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the blobs.
    pub root: PathBuf,
    /// Largest accepted blob in bytes.
    pub max_blob_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("sealrun").join("blobs"),
            max_blob_size: DEFAULT_MAX_BLOB_SIZE,
        }
    }
}

// ── Runner config ───────────────────────────────────────────────

/// Task runner settings (`[runner]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Directory under which per-task workspaces are allocated.
    pub workspace_root: PathBuf,
    /// Optional deadline for the execute stage, in seconds.
    pub timeout_secs: Option<u64>,
    /// Default input-digest matching mode for claims built from config.
    pub input_order: InputOrder,
}

impl RunnerConfig {
    /// Execute deadline as a [`Duration`], if configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir().join("sealrun").join("workspaces"),
            timeout_secs: None,
            input_order: InputOrder::default(),
        }
    }
}

// ── Logging config ──────────────────────────────────────────────

/// Logging settings (`[logging]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Tracing filter used when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for rotated JSON logs. Console-only when unset.
    pub logs_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            logs_dir: None,
        }
    }
}

// ── Paths ───────────────────────────────────────────────────────

/// Resolve the default config directory (`~/.sealrun/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".sealrun"))
}

/// Resolve the config file path using a custom env resolver.
///
/// Checks `$SEALRUN_CONFIG_PATH` first, then `~/.sealrun/config.toml`.
///
/// # Errors
///
/// Returns an error if neither the variable nor a home directory is available.
pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> anyhow::Result<PathBuf> {
    if let Some(p) = env("SEALRUN_CONFIG_PATH") {
        return Ok(PathBuf::from(p));
    }
    Ok(config_dir()?.join("config.toml"))
}
