//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::services::DEFAULT_INVALIDATION_MARGIN_POINTS;
use crate::infrastructure::image::QueueConfig;
use crate::infrastructure::image::disk_cache::DEFAULT_MAX_CACHE_SIZE;
use crate::infrastructure::image::memory_cache::DEFAULT_MEMORY_BUDGET;
use crate::infrastructure::image::providers::DEFAULT_HTTP_TIMEOUT_SECS;

pub(crate) const APP_NAME: &str = "clipthumb";
pub(crate) const APP_QUALIFIER: &str = "dev";
pub(crate) const APP_ORGANIZATION: &str = "clipthumb";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    Info,
    /// Warning level.
    #[default]
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Converts to tracing level.
    #[must_use]
    pub const fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Application configuration, read from `config.toml` and overridden by
/// command-line flags.
#[derive(Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Log file path. Logs go to stderr when unset.
    #[serde(default)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Rendition engine settings.
    #[serde(default)]
    pub cache: EngineConfig,
}

/// Rendition engine settings (`[cache]` table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Memory cache budget in bytes.
    #[serde(default = "default_memory_budget")]
    pub memory_budget_bytes: u64,

    /// Disk cache budget in bytes.
    #[serde(default = "default_disk_budget")]
    pub disk_budget_bytes: u64,

    /// Growth in points tolerated before a disk rendition is regenerated.
    #[serde(default = "default_margin")]
    pub invalidation_margin_points: f64,

    /// Maximum decodes running at once.
    #[serde(default = "default_max_concurrent_decodes")]
    pub max_concurrent_decodes: usize,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Disk cache directory. Platform cache dir when unset.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

fn default_memory_budget() -> u64 {
    DEFAULT_MEMORY_BUDGET
}

fn default_disk_budget() -> u64 {
    DEFAULT_MAX_CACHE_SIZE
}

fn default_margin() -> f64 {
    DEFAULT_INVALIDATION_MARGIN_POINTS
}

fn default_max_concurrent_decodes() -> usize {
    4
}

fn default_http_timeout() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: default_memory_budget(),
            disk_budget_bytes: default_disk_budget(),
            invalidation_margin_points: default_margin(),
            max_concurrent_decodes: default_max_concurrent_decodes(),
            http_timeout_secs: default_http_timeout(),
            cache_dir: None,
        }
    }
}

impl EngineConfig {
    /// Builds the processing queue configuration.
    #[must_use]
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            memory_budget: self.memory_budget_bytes,
            disk_budget: self.disk_budget_bytes,
            invalidation_margin_points: self.invalidation_margin_points,
            max_concurrent_decodes: self.max_concurrent_decodes,
            cache_dir: self.cache_dir.clone(),
        }
    }
}

use super::args::CliArgs;

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(cache_dir) = &args.cache_dir {
            self.cache.cache_dir = Some(cache_dir.clone());
        }
        if let Some(memory_budget) = args.memory_budget {
            self.cache.memory_budget_bytes = memory_budget;
        }
        if let Some(disk_budget) = args.disk_budget {
            self.cache.disk_budget_bytes = disk_budget;
        }
        if let Some(margin) = args.invalidation_margin {
            self.cache.invalidation_margin_points = margin;
        }
        if let Some(workers) = args.max_concurrent_decodes {
            self.cache.max_concurrent_decodes = workers;
        }
        if let Some(timeout) = args.http_timeout {
            self.cache.http_timeout_secs = timeout;
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_path: None,
            log_level: LogLevel::default(),
            cache: EngineConfig::default(),
        }
    }
}
