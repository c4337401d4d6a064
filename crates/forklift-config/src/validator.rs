//! Configuration validation.

use std::str::FromStr;

use cron::Schedule;

use crate::schema::{Config, QueueConfig, StoreBackend};

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_server(config, &mut result);
        Self::validate_store(config, &mut result);
        Self::validate_queue("queue", &config.queue, &mut result);
        for name in config.queues.keys() {
            let path = format!("queues.{}", name);
            if !is_valid_queue_name(name) {
                result.add_error(ValidationError::new(
                    path.clone(),
                    "Queue names must be 1-64 characters of [A-Za-z0-9_-]",
                ));
            }
            Self::validate_queue(&path, &config.queue_config(name), &mut result);
        }
        Self::validate_processor(config, &mut result);
        Self::validate_triggers(config, &mut result);

        result
    }

    fn validate_server(config: &Config, result: &mut ValidationResult) {
        if config.server.port == 0 {
            result.add_error(ValidationError::new("server.port", "Port cannot be 0"));
        }

        if config.server.host.is_empty() {
            result.add_error(ValidationError::new("server.host", "Host cannot be empty"));
        }
    }

    fn validate_store(config: &Config, result: &mut ValidationResult) {
        if config.store.backend == StoreBackend::Sqlite && config.store.path.is_empty() {
            result.add_error(ValidationError::new(
                "store.path",
                "A database path is required for the sqlite backend",
            ));
        }

        if config.store.key_prefix.is_empty() {
            result.add_error(ValidationError::new(
                "store.key_prefix",
                "Key prefix cannot be empty",
            ));
        }

        if config.store.backend == StoreBackend::Memory {
            result.add_warning(ValidationWarning::new(
                "store.backend",
                "memory backend is process-local; queued jobs are lost on exit and not shared",
            ));
        }
    }

    fn validate_queue(path: &str, queue: &QueueConfig, result: &mut ValidationResult) {
        if queue.max_retries == 0 {
            result.add_warning(ValidationWarning::new(
                format!("{}.max_retries", path),
                "max_retries is 0, every failure is dead-lettered immediately",
            ));
        }

        if queue.retry_delay_secs == 0 {
            result.add_error(ValidationError::new(
                format!("{}.retry_delay_secs", path),
                "retry_delay_secs must be at least 1",
            ));
        }

        if queue.max_retry_delay_secs < queue.retry_delay_secs {
            result.add_error(ValidationError::new(
                format!("{}.max_retry_delay_secs", path),
                "max_retry_delay_secs must be >= retry_delay_secs",
            ));
        }

        if queue.dedup_ttl_secs == 0 {
            result.add_warning(ValidationWarning::new(
                format!("{}.dedup_ttl_secs", path),
                "dedup_ttl_secs is 0, duplicate jobs will never be suppressed",
            ));
        }
    }

    fn validate_processor(config: &Config, result: &mut ValidationResult) {
        let p = &config.processor;

        if p.batch_size == 0 {
            result.add_error(ValidationError::new(
                "processor.batch_size",
                "batch_size must be greater than 0",
            ));
        }

        if p.flush_limit == 0 {
            result.add_error(ValidationError::new(
                "processor.flush_limit",
                "flush_limit must be greater than 0",
            ));
        }

        if p.lock_ttl_secs == 0 {
            result.add_error(ValidationError::new(
                "processor.lock_ttl_secs",
                "lock_ttl_secs must be greater than 0",
            ));
        } else if p.lock_ttl_secs < 10 {
            result.add_warning(ValidationWarning::new(
                "processor.lock_ttl_secs",
                "lock_ttl_secs is very short; a slow cycle may overlap with the next one",
            ));
        }

        if p.max_drain_cycles == 0 {
            result.add_error(ValidationError::new(
                "processor.max_drain_cycles",
                "max_drain_cycles must be greater than 0",
            ));
        }
    }

    fn validate_triggers(config: &Config, result: &mut ValidationResult) {
        if config.scheduler.check_interval_secs == 0 {
            result.add_error(ValidationError::new(
                "scheduler.check_interval_secs",
                "check_interval_secs must be greater than 0",
            ));
        }

        for (i, trigger) in config.triggers.iter().enumerate() {
            let path = format!("triggers[{}]", i);
            if !is_valid_queue_name(&trigger.queue) {
                result.add_error(ValidationError::new(
                    format!("{}.queue", path),
                    "Queue names must be 1-64 characters of [A-Za-z0-9_-]",
                ));
            }
            if let Err(e) = Schedule::from_str(&trigger.schedule) {
                result.add_error(ValidationError::new(
                    format!("{}.schedule", path),
                    format!("Invalid cron expression: {}", e),
                ));
            }
        }

        if !config.triggers.is_empty() && !config.scheduler.enabled {
            result.add_warning(ValidationWarning::new(
                "scheduler.enabled",
                "triggers are configured but the scheduler is disabled",
            ));
        }
    }
}

/// Queue names become part of store keys: `[A-Za-z0-9_-]{1,64}`.
pub fn is_valid_queue_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
