//! Configuration file handling
//!
//! Configuration is resolved once at startup (defaults, then the TOML file,
//! then `WINDBG_MCP_*` environment variables) and handed to each component
//! as an immutable value.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use super::paths::{config_path, DEFAULT_PIPE_NAME};
use super::Result;

/// Prefix for environment variable overrides
const ENV_PREFIX: &str = "WINDBG_MCP_";

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Named pipe transport settings
    #[serde(default)]
    pub pipe: PipeConfig,

    /// Command timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Transport retry settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Result cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Executor settings
    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// Named pipe and connection pool settings
#[derive(Debug, Clone, Deserialize)]
pub struct PipeConfig {
    /// Pipe name, with or without the `\\.\pipe\` prefix
    #[serde(default = "default_pipe_name")]
    pub name: String,

    /// Read buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// How long to keep retrying a busy pipe
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Maximum number of simultaneously open pipe handles
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Idle handles older than this are closed
    #[serde(default = "default_connection_max_age")]
    pub connection_max_age_secs: u64,

    /// Slice length for pool waits and busy-pipe polling
    #[serde(default = "default_wait_slice")]
    pub wait_slice_ms: u64,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            name: default_pipe_name(),
            buffer_size: default_buffer_size(),
            connect_timeout_ms: default_connect_timeout(),
            max_connections: default_max_connections(),
            connection_max_age_secs: default_connection_max_age(),
            wait_slice_ms: default_wait_slice(),
        }
    }
}

fn default_pipe_name() -> String {
    DEFAULT_PIPE_NAME.to_string()
}
fn default_buffer_size() -> usize {
    8192
}
fn default_connect_timeout() -> u64 {
    30_000
}
fn default_max_connections() -> usize {
    3
}
fn default_connection_max_age() -> u64 {
    3600
}
fn default_wait_slice() -> u64 {
    100
}

/// Timeout settings in milliseconds
#[derive(Debug, Clone, Deserialize)]
pub struct Timeouts {
    /// Default timeout for debugger commands
    #[serde(default = "default_command_timeout")]
    pub command_ms: u64,

    /// Cheap commands like `version`
    #[serde(default = "default_quick_timeout")]
    pub quick_ms: u64,

    /// Heavy analysis (`!analyze`, `!process`, ...)
    #[serde(default = "default_analysis_timeout")]
    pub analysis_ms: u64,

    /// Bulk listings like `lm`
    #[serde(default = "default_bulk_timeout")]
    pub bulk_ms: u64,

    /// Long-running iteration commands
    #[serde(default = "default_streaming_timeout")]
    pub streaming_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command_ms: default_command_timeout(),
            quick_ms: default_quick_timeout(),
            analysis_ms: default_analysis_timeout(),
            bulk_ms: default_bulk_timeout(),
            streaming_ms: default_streaming_timeout(),
        }
    }
}

fn default_command_timeout() -> u64 {
    30_000
}
fn default_quick_timeout() -> u64 {
    10_000
}
fn default_analysis_timeout() -> u64 {
    300_000
}
fn default_bulk_timeout() -> u64 {
    180_000
}
fn default_streaming_timeout() -> u64 {
    900_000
}

/// Transport retry settings
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (total attempts are capped at 4)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between attempts (capped at 500ms)
    #[serde(default = "default_retry_delay")]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_retry_delay(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    1000
}

/// Result cache settings
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    #[serde(default = "default_cache_size")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_cache_ttl(),
            max_entries: default_cache_size(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_cache_ttl() -> u64 {
    300
}
fn default_cache_size() -> usize {
    100
}

/// Executor settings
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Run the syntax and safety checks before dispatch
    #[serde(default = "default_true")]
    pub validation_enabled: bool,

    /// Commands allowed in flight at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_commands: usize,

    /// Communication errors in a row before recovery kicks in
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    /// Failures in a row within a sequence before warning
    #[serde(default = "default_sequence_threshold")]
    pub sequence_failure_threshold: u32,

    /// Treat network-debugging errors from the version probe as healthy
    #[serde(default = "default_true")]
    pub assume_healthy_on_network_errors: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            validation_enabled: true,
            max_concurrent_commands: default_max_concurrent(),
            max_consecutive_errors: default_max_consecutive_errors(),
            sequence_failure_threshold: default_sequence_threshold(),
            assume_healthy_on_network_errors: true,
        }
    }
}

fn default_max_concurrent() -> usize {
    5
}
fn default_max_consecutive_errors() -> u32 {
    3
}
fn default_sequence_threshold() -> u32 {
    2
}

const QUICK_COMMANDS: &[&str] = &["version", "help", "?", "cls", "clear"];
const ANALYSIS_COMMANDS: &[&str] = &["!analyze", "!dump", "!process", "!thread"];
const BULK_COMMANDS: &[&str] = &["!process 0 0", "!thread 0 0", "lm"];
const STREAMING_COMMANDS: &[&str] = &["!for_each", "!foreach"];

impl Config {
    /// Load configuration from the default config file plus environment
    ///
    /// Returns default configuration if the file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default().with_env_overrides()),
        }
    }

    /// Load configuration from an explicit file, then apply the environment
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Ok(Self::from_toml(&content)?.with_env_overrides())
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    /// Apply `WINDBG_MCP_*` overrides from the process environment
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Apply overrides from an arbitrary lookup.
    ///
    /// Malformed values are logged and the previous value is kept.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("PIPE_NAME").filter(|v| !v.trim().is_empty()) {
            self.pipe.name = name;
        }
        override_parsed(&lookup, "BUFFER_SIZE", &mut self.pipe.buffer_size);
        override_parsed(&lookup, "CONNECTION_TIMEOUT_MS", &mut self.pipe.connect_timeout_ms);
        override_parsed(&lookup, "MAX_CONNECTIONS", &mut self.pipe.max_connections);
        override_parsed(&lookup, "COMMAND_TIMEOUT_MS", &mut self.timeouts.command_ms);
        override_parsed(&lookup, "MAX_RETRY_ATTEMPTS", &mut self.retry.max_attempts);
        override_parsed(&lookup, "RETRY_DELAY_MS", &mut self.retry.delay_ms);
        override_bool(&lookup, "ENABLE_VALIDATION", &mut self.execution.validation_enabled);
        override_bool(&lookup, "ENABLE_CACHING", &mut self.cache.enabled);
        override_parsed(&lookup, "CACHE_TTL_SECONDS", &mut self.cache.ttl_secs);
        override_parsed(&lookup, "CACHE_MAX_ENTRIES", &mut self.cache.max_entries);
        override_parsed(
            &lookup,
            "MAX_CONCURRENT_COMMANDS",
            &mut self.execution.max_concurrent_commands,
        );
        self
    }

    /// Pick the timeout class for a command
    ///
    /// Bulk listings win over analysis commands, so `!process 0 0` gets the
    /// bulk budget even though it starts with `!process`.
    pub fn timeout_for_command(&self, command: &str) -> Duration {
        let cmd = command.trim().to_lowercase();
        let t = &self.timeouts;

        let ms = if QUICK_COMMANDS.contains(&cmd.as_str()) {
            t.quick_ms
        } else if STREAMING_COMMANDS.iter().any(|p| cmd.starts_with(p)) {
            t.streaming_ms
        } else if BULK_COMMANDS.iter().any(|p| cmd == *p || cmd.starts_with(&format!("{p} "))) {
            t.bulk_ms
        } else if ANALYSIS_COMMANDS.iter().any(|p| cmd.starts_with(p)) {
            t.analysis_ms
        } else {
            t.command_ms
        };
        Duration::from_millis(ms)
    }

    /// Total send attempts the Communication Manager makes
    pub fn send_attempts(&self) -> u32 {
        self.retry.max_attempts.saturating_add(1).clamp(1, 4)
    }

    /// Delay between send attempts
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry.delay_ms.min(500))
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(
                variable = %format!("{ENV_PREFIX}{key}"),
                value = %raw,
                "Ignoring malformed configuration value"
            ),
        }
    }
}

fn override_bool<F>(lookup: &F, key: &str, slot: &mut bool)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => *slot = true,
            "false" | "0" | "no" | "off" => *slot = false,
            _ => tracing::warn!(
                variable = %format!("{ENV_PREFIX}{key}"),
                value = %raw,
                "Ignoring malformed configuration value"
            ),
        }
    }
}
