//! Configuration for the compaction engine

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, TurnstileError};

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "turnstile.toml";

/// Environment variable naming an additional config file
pub const CONFIG_PATH_ENV: &str = "TURNSTILE_CONFIG_PATH";

/// Prefix for environment variable overrides (e.g. `TURNSTILE_CONTEXT_LIMIT=8`)
pub const ENV_PREFIX: &str = "TURNSTILE_";

/// Compaction behavior for a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Number of most-recent real user turns retained verbatim
    pub keep_last_n_turns: usize,

    /// Maximum number of real user turns before compaction triggers
    pub context_limit: usize,

    /// Upper bound on a single summarizer call
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub summarizer_timeout: Option<Duration>,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            keep_last_n_turns: 3,
            context_limit: 10,
            summarizer_timeout: None,
        }
    }
}

impl CompactionConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of turns kept verbatim
    pub fn with_keep_last_n_turns(mut self, turns: usize) -> Self {
        self.keep_last_n_turns = turns;
        self
    }

    /// Set the turn limit
    pub fn with_context_limit(mut self, limit: usize) -> Self {
        self.context_limit = limit;
        self
    }

    /// Bound summarizer calls
    pub fn with_summarizer_timeout(mut self, timeout: Duration) -> Self {
        self.summarizer_timeout = Some(timeout);
        self
    }

    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. `turnstile.toml` in the working directory
    /// 3. File named by `TURNSTILE_CONFIG_PATH`
    /// 4. `TURNSTILE_*` environment variable overrides
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source is invalid or the
    /// resulting turn limits are inconsistent.
    pub fn load() -> Result<Self> {
        Self::load_with(None)
    }

    /// Like [`CompactionConfig::load`], but an explicit file takes the place
    /// of `TURNSTILE_CONFIG_PATH`. Environment overrides still apply on top.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source is invalid or the
    /// resulting turn limits are inconsistent.
    pub fn load_with(explicit: Option<&Path>) -> Result<Self> {
        Self::resolve(explicit, CONFIG_PATH_ENV, ENV_PREFIX)
    }

    /// Load configuration from a specific file path (no environment overrides).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or fails validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: CompactionConfig = Figment::new()
            .merge(Serialized::defaults(CompactionConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .extract()
            .map_err(|e| {
                TurnstileError::Configuration(format!(
                    "Failed to load configuration file: {}",
                    e
                ))
            })?;

        config.validate()?;
        Ok(config)
    }

    fn resolve(explicit: Option<&Path>, path_env: &str, env_prefix: &str) -> Result<Self> {
        let extra = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(path_env).ok().map(PathBuf::from));
        Self::layered(extra.as_deref(), env_prefix)
    }

    fn layered(extra_file: Option<&Path>, env_prefix: &str) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::new()
            .merge(Serialized::defaults(CompactionConfig::default()))
            .merge(Toml::file(DEFAULT_CONFIG_FILE));

        if let Some(path) = extra_file {
            figment = figment.merge(Toml::file(path));
        }

        let config: CompactionConfig = figment
            .merge(Env::prefixed(env_prefix).ignore(&["config_path"]))
            .extract()
            .map_err(|e| {
                TurnstileError::Configuration(format!("Failed to load configuration: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Check the turn invariant: `1 <= context_limit` and `keep_last_n_turns <= context_limit`
    pub fn validate(&self) -> Result<()> {
        if self.context_limit == 0 || self.keep_last_n_turns > self.context_limit {
            return Err(TurnstileError::InvalidTurnLimits {
                keep_last_n_turns: self.keep_last_n_turns,
                context_limit: self.context_limit,
            });
        }
        Ok(())
    }
}
