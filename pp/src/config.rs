//! promptparse configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::provider::ParseOptions;
use crate::resolver::DEFAULT_MAX_DEPTH;
use crate::stream::DEFAULT_BATCH_SIZE;

/// Main promptparse configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Parser defaults
    pub parser: ParserConfig,

    /// Change watching
    pub watch: WatchConfig,

    /// Recursive resolution
    pub resolver: ResolverConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Project-local config: .promptparse.yml
        let local_config = PathBuf::from(".promptparse.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // User config: ~/.config/promptparse/promptparse.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("promptparse").join("promptparse.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Log level from the config file, read before logging is set up
    ///
    /// Failures are swallowed; the full [`Config::load`] reports them later.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|config| config.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Parser options built from the `parser` section
    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            track_changes: self.parser.track_changes,
            allow_non_eligible: self.parser.allow_non_eligible,
            language_override: self.parser.language_override.clone(),
            batch_size: self.parser.batch_size.max(1),
        }
    }
}

/// Parser defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Re-parse when sources change
    #[serde(rename = "track-changes")]
    pub track_changes: bool,

    /// Parse files without a prompt suffix
    #[serde(rename = "allow-non-eligible")]
    pub allow_non_eligible: bool,

    /// Force a content type (prompt, instructions, chatmode)
    #[serde(rename = "language-override")]
    pub language_override: Option<String>,

    /// Items pulled per stream batch
    #[serde(rename = "batch-size")]
    pub batch_size: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            track_changes: false,
            allow_non_eligible: false,
            language_override: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Change watching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Polling interval for file changes in milliseconds
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { poll_interval_ms: 500 }
    }
}

impl WatchConfig {
    /// Get the poll interval as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Recursive resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Maximum reference nesting depth
    #[serde(rename = "max-depth")]
    pub max_depth: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}
