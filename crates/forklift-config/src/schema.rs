//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Defaults applied to every queue.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Per-queue overrides, keyed by queue name.
    #[serde(default)]
    pub queues: HashMap<String, QueueOverride>,

    #[serde(default)]
    pub processor: ProcessorConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Cron schedules that run processing cycles from `forklift serve`.
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
}

impl Config {
    /// Effective settings for one queue: defaults with any override applied.
    pub fn queue_config(&self, queue: &str) -> QueueConfig {
        match self.queues.get(queue) {
            Some(o) => self.queue.clone().merged(o),
            None => self.queue.clone(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Which store implementation backs the queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local; state is lost on exit.
    Memory,
    /// SQLite file shared by every process on the host.
    #[default]
    Sqlite,
}

/// Key-value store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Database file for the sqlite backend. `~` is expanded.
    #[serde(default = "default_store_path")]
    pub path: String,

    /// Namespace prepended to every key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_store_path() -> String {
    "~/.forklift/queue.db".to_string()
}

fn default_key_prefix() -> String {
    "forklift".to_string()
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Directory for daily-rotated log files. Console only when unset.
    #[serde(default)]
    pub directory: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            directory: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Retry and idempotency settings for a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Failed attempts allowed before a message is dead-lettered.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry. Doubles on each further attempt.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Upper bound on the retry delay.
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_secs: u64,

    /// How long a completed job's fingerprint suppresses identical jobs.
    #[serde(default = "default_dedup_ttl")]
    pub dedup_ttl_secs: u64,
}

impl QueueConfig {
    fn merged(mut self, o: &QueueOverride) -> Self {
        if let Some(v) = o.max_retries {
            self.max_retries = v;
        }
        if let Some(v) = o.retry_delay_secs {
            self.retry_delay_secs = v;
        }
        if let Some(v) = o.max_retry_delay_secs {
            self.max_retry_delay_secs = v;
        }
        if let Some(v) = o.dedup_ttl_secs {
            self.dedup_ttl_secs = v;
        }
        self
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
            max_retry_delay_secs: default_max_retry_delay(),
            dedup_ttl_secs: default_dedup_ttl(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    30
}

fn default_max_retry_delay() -> u64 {
    3600
}

fn default_dedup_ttl() -> u64 {
    86_400
}

/// Per-queue override of [`QueueConfig`]. Unset fields inherit the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueOverride {
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_delay_secs: Option<u64>,
    #[serde(default)]
    pub max_retry_delay_secs: Option<u64>,
    #[serde(default)]
    pub dedup_ttl_secs: Option<u64>,
}

/// Processing cycle bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Messages popped per cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Scheduled messages promoted per cycle.
    #[serde(default = "default_flush_limit")]
    pub flush_limit: usize,

    /// Lock expiry; must exceed the worst-case cycle duration.
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,

    /// Upper bound on cycles run by a single drain request.
    #[serde(default = "default_max_drain_cycles")]
    pub max_drain_cycles: u32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_limit: default_flush_limit(),
            lock_ttl_secs: default_lock_ttl(),
            max_drain_cycles: default_max_drain_cycles(),
        }
    }
}

fn default_batch_size() -> usize {
    25
}

fn default_flush_limit() -> usize {
    100
}

fn default_lock_ttl() -> u64 {
    60
}

fn default_max_drain_cycles() -> u32 {
    10
}

/// In-process cron scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Run triggers from `forklift serve`.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How often trigger schedules are checked.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: default_check_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_check_interval() -> u64 {
    1
}

/// A cron schedule bound to a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub queue: String,

    /// Cron expression with a seconds field, e.g. `0 */5 * * * *`.
    pub schedule: String,

    /// Drain the queue instead of running a single cycle.
    #[serde(default)]
    pub drain: bool,
}
