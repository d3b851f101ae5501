//! Configuration for the sync engine.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/convsync/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::queue::QueueConfig;
use crate::reconciler::ReconcileConfig;
use crate::session::{SendFailurePolicy, SessionConfig};

/// Why configuration could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A value parsed but is out of range.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Offending key, as written in the file.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    session: SessionFileConfig,
    reconcile: ReconcileFileConfig,
    pagination: PaginationFileConfig,
    queue: QueueFileConfig,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    page_size: Option<usize>,
    event_buffer: Option<usize>,
    pending_timeout_secs: Option<u64>,
    sweep_interval_ms: Option<u64>,
    resubscribe_delay_ms: Option<u64>,
    max_resubscribe_attempts: Option<u32>,
    send_failure_policy: Option<SendFailurePolicy>,
}

/// `[reconcile]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconcileFileConfig {
    match_window: Option<usize>,
    match_max_age_secs: Option<u64>,
}

/// `[pagination]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct PaginationFileConfig {
    top_threshold_px: Option<f32>,
}

/// `[queue]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct QueueFileConfig {
    poll_interval_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved engine configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    /// Conversation session settings.
    pub session: SessionConfig,
    /// Pending-match settings.
    pub reconcile: ReconcileConfig,
    /// Live-queue polling settings.
    pub queue: QueueConfig,
}

impl EngineConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or if a resolved value is out of range.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, &file);
        config.validate()?;
        Ok(config)
    }

    /// Resolve from CLI args and a parsed config file. Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let session = &file.session;

        Self {
            session: SessionConfig {
                page_size: cli
                    .page_size
                    .or(session.page_size)
                    .unwrap_or(defaults.session.page_size),
                event_buffer: session
                    .event_buffer
                    .unwrap_or(defaults.session.event_buffer),
                pending_timeout: session
                    .pending_timeout_secs
                    .map_or(defaults.session.pending_timeout, Duration::from_secs),
                sweep_interval: session
                    .sweep_interval_ms
                    .map_or(defaults.session.sweep_interval, Duration::from_millis),
                resubscribe_delay: session
                    .resubscribe_delay_ms
                    .map_or(defaults.session.resubscribe_delay, Duration::from_millis),
                max_resubscribe_attempts: session
                    .max_resubscribe_attempts
                    .unwrap_or(defaults.session.max_resubscribe_attempts),
                top_threshold_px: file
                    .pagination
                    .top_threshold_px
                    .unwrap_or(defaults.session.top_threshold_px),
                send_failure_policy: session
                    .send_failure_policy
                    .unwrap_or(defaults.session.send_failure_policy),
            },
            reconcile: ReconcileConfig {
                match_window: file
                    .reconcile
                    .match_window
                    .unwrap_or(defaults.reconcile.match_window),
                match_max_age: file
                    .reconcile
                    .match_max_age_secs
                    .map_or(defaults.reconcile.match_max_age, Duration::from_secs),
            },
            queue: QueueConfig {
                poll_interval: cli
                    .poll_interval_ms
                    .or(file.queue.poll_interval_ms)
                    .map_or(defaults.queue.poll_interval, Duration::from_millis),
            },
        }
    }

    /// Reject values the engine cannot run with.
    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason| Err(ConfigError::Invalid { field, reason });
        if self.session.page_size == 0 {
            return invalid("session.page_size", "must be at least 1");
        }
        if self.session.sweep_interval.is_zero() {
            return invalid("session.sweep_interval_ms", "must be at least 1");
        }
        if self.reconcile.match_window == 0 {
            return invalid("reconcile.match_window", "must be at least 1");
        }
        if !self.session.top_threshold_px.is_finite() || self.session.top_threshold_px < 0.0 {
            return invalid("pagination.top_threshold_px", "must be a non-negative number");
        }
        if self.queue.poll_interval.is_zero() {
            return invalid("queue.poll_interval_ms", "must be at least 1");
        }
        Ok(())
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Conversation sync engine demo")]
pub struct CliArgs {
    /// Path to config file (default: `~/.config/convsync/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Messages per history page.
    #[arg(long, env = "CONVSYNC_PAGE_SIZE")]
    pub page_size: Option<usize>,

    /// Live-queue poll interval in milliseconds.
    #[arg(long, env = "CONVSYNC_POLL_INTERVAL_MS")]
    pub poll_interval_ms: Option<u64>,

    /// Identity the demo sends messages as.
    #[arg(long, default_value = "clinic", env = "CONVSYNC_SENDER")]
    pub sender: String,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "CONVSYNC_LOG")]
    pub log_level: String,

    /// Path to log file (default: stderr).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Read the config file, if there is one.
///
/// An explicit path must exist. The default path may be absent, in which
/// case every setting falls back to its default.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    let (path, required) = match explicit_path {
        Some(path) => (path.to_path_buf(), true),
        None => match default_config_path() {
            Some(path) => (path, false),
            None => return Ok(ConfigFile::default()),
        },
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            Ok(ConfigFile::default())
        }
        Err(source) => Err(ConfigError::ReadFile { path, source }),
    }
}

/// `<config dir>/convsync/config.toml`, when the platform has a config dir.
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("convsync").join("config.toml"))
}
