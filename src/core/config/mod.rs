//! core::config
//!
//! Configuration schema and loading.
//!
//! # Overview
//!
//! hgland has two configuration scopes:
//! - **Global**: host-level settings (hg binary, timeouts, policy table)
//! - **Repo**: per-working-copy overrides (base revision, lock policy...)
//!
//! # Precedence
//!
//! Configuration values are resolved in this order (later overrides earlier):
//! 1. Default values
//! 2. Global config file
//! 3. Repo config file
//! 4. CLI flags (not handled here)
//!
//! # Global Config Locations
//!
//! An explicit path (CLI `--config`) wins. Otherwise, searched in order:
//! 1. `$HGLAND_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/hgland/config.toml`
//! 3. `~/.hgland/config.toml`
//!
//! # Repo Config Location
//!
//! `<root>/.hg/hgland/config.toml`
//!
//! # Example
//!
//! ```no_run
//! use hgland::core::config::Config;
//! use std::path::Path;
//!
//! let result = Config::load(Some(Path::new("/srv/clones/central")), None).unwrap();
//! let config = result.config;
//!
//! println!("hg binary: {}", config.hg_config().binary);
//! println!("base revision: {}", config.session_options().base_revision);
//! ```

pub mod schema;

pub use schema::{ClassifySection, ConfigFile, HgSection, SessionSection};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::core::ops::lock::LockPolicy;
use crate::core::paths::HgPaths;
use crate::engine::session::SessionOptions;
use crate::hg::{FailurePolicy, HgConfig};

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Result of loading configuration.
#[derive(Debug)]
pub struct ConfigLoadResult {
    /// The loaded configuration.
    pub config: Config,
}

/// Merged configuration from all sources.
///
/// Accessors apply precedence automatically: repo overrides global,
/// global overrides defaults.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Global configuration
    pub global: ConfigFile,
    /// Repository configuration (if a working copy was given)
    pub repo: Option<ConfigFile>,
    global_path: Option<PathBuf>,
    repo_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration.
    ///
    /// `repo_root` selects the working copy whose repo config is merged in.
    /// `explicit_global` replaces global config discovery.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read, parsed,
    /// or validated, or if `explicit_global` does not exist. Missing
    /// discovered files are not an error (defaults are used).
    pub fn load(
        repo_root: Option<&Path>,
        explicit_global: Option<&Path>,
    ) -> Result<ConfigLoadResult, ConfigError> {
        let (global, global_path) = match explicit_global {
            Some(path) => (Self::read_config(path)?, Some(path.to_path_buf())),
            None => Self::load_global()?,
        };

        let (repo, repo_path) = match repo_root {
            Some(root) => {
                let path = HgPaths::new(root.to_path_buf()).repo_config_path();
                if path.exists() {
                    (Some(Self::read_config(&path)?), Some(path))
                } else {
                    (None, None)
                }
            }
            None => (None, None),
        };

        global.validate()?;
        if let Some(ref r) = repo {
            r.validate()?;
        }

        Ok(ConfigLoadResult {
            config: Config {
                global,
                repo,
                global_path,
                repo_path,
            },
        })
    }

    fn load_global() -> Result<(ConfigFile, Option<PathBuf>), ConfigError> {
        if let Ok(path) = std::env::var("HGLAND_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok((Self::read_config(&path)?, Some(path)));
            }
        }

        if let Ok(xdg_home) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_home).join("hgland/config.toml");
            if path.exists() {
                return Ok((Self::read_config(&path)?, Some(path)));
            }
        }

        if let Some(home) = dirs::home_dir() {
            let path = home.join(".hgland/config.toml");
            if path.exists() {
                return Ok((Self::read_config(&path)?, Some(path)));
            }
        }

        Ok((ConfigFile::default(), None))
    }

    fn read_config(path: &Path) -> Result<ConfigFile, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Resolve a value, repo first, then global.
    fn pick<T>(&self, get: impl Fn(&ConfigFile) -> Option<T>) -> Option<T> {
        self.repo.as_ref().and_then(&get).or_else(|| get(&self.global))
    }

    // =========================================================================
    // Accessor methods with precedence
    // =========================================================================

    /// Settings for invoking hg, with defaults filled in.
    pub fn hg_config(&self) -> HgConfig {
        let defaults = HgConfig::default();
        let secs = Duration::from_secs;
        HgConfig {
            binary: self
                .pick(|f| f.hg.as_ref()?.binary.clone())
                .unwrap_or(defaults.binary),
            command_timeout: self
                .pick(|f| f.hg.as_ref()?.command_timeout_secs)
                .map(secs)
                .unwrap_or(defaults.command_timeout),
            import_timeout: self
                .pick(|f| f.hg.as_ref()?.import_timeout_secs)
                .map(secs)
                .unwrap_or(defaults.import_timeout),
            pull_timeout: self
                .pick(|f| f.hg.as_ref()?.pull_timeout_secs)
                .map(secs)
                .unwrap_or(defaults.pull_timeout),
            similarity: self
                .pick(|f| f.hg.as_ref()?.similarity)
                .unwrap_or(defaults.similarity),
            fallback_patch_tool: self
                .pick(|f| f.hg.as_ref()?.fallback_patch_tool.clone())
                .unwrap_or(defaults.fallback_patch_tool),
            policy: self.failure_policy(),
        }
    }

    /// The failure classification table.
    pub fn failure_policy(&self) -> FailurePolicy {
        let defaults = FailurePolicy::default();
        FailurePolicy {
            conflict_patterns: self
                .pick(|f| f.classify.as_ref()?.conflict_patterns.clone())
                .unwrap_or(defaults.conflict_patterns),
            fallback_patterns: self
                .pick(|f| f.classify.as_ref()?.fallback_patterns.clone())
                .unwrap_or(defaults.fallback_patterns),
        }
    }

    /// Session behavior, with defaults filled in.
    pub fn session_options(&self) -> SessionOptions {
        let defaults = SessionOptions::default();
        let lock_policy = match self
            .pick(|f| f.session.as_ref()?.lock_policy.clone())
            .as_deref()
        {
            Some("wait") => LockPolicy::Wait(Duration::from_secs(
                self.pick(|f| f.session.as_ref()?.lock_wait_secs)
                    .unwrap_or(DEFAULT_LOCK_WAIT_SECS),
            )),
            Some(_) => LockPolicy::FailFast,
            None => defaults.lock_policy,
        };
        SessionOptions {
            base_revision: self
                .pick(|f| f.session.as_ref()?.base_revision.clone())
                .unwrap_or(defaults.base_revision),
            pull_on_enter: self
                .pick(|f| f.session.as_ref()?.pull_on_enter)
                .unwrap_or(defaults.pull_on_enter),
            strip_drafts_on_enter: self
                .pick(|f| f.session.as_ref()?.strip_drafts_on_enter)
                .unwrap_or(defaults.strip_drafts_on_enter),
            lock_policy,
        }
    }

    /// Path to the loaded global config file.
    pub fn global_config_loaded_from(&self) -> Option<&Path> {
        self.global_path.as_deref()
    }

    /// Path to the loaded repo config file.
    pub fn repo_config_loaded_from(&self) -> Option<&Path> {
        self.repo_path.as_deref()
    }
}

const DEFAULT_LOCK_WAIT_SECS: u64 = 30;
