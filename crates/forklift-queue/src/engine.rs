//! Queue engine over a key-value store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use forklift_config::{Config, QueueConfig, is_valid_queue_name};
use forklift_store::clock::expiry_after;
use forklift_store::{Clock, KvStore};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::envelope::{Envelope, Resolution, fingerprint};
use crate::error::QueueError;
use crate::keys::{Bucket, KeySpace};

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;

/// Options for [`QueueEngine::enqueue`].
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Overrides the fingerprint derived from queue, type and payload.
    pub fingerprint: Option<String>,
    /// Process no earlier than this long after enqueue.
    pub delay: Option<Duration>,
    /// Process no earlier than this time. Wins over `delay`.
    pub due_at: Option<DateTime<Utc>>,
    /// Overrides the queue's `max_retries`.
    pub max_retries: Option<u32>,
}

impl EnqueueOptions {
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }
}

/// Why an in-flight message failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub reason: String,
    /// Terminal failures skip the retry budget and go straight to dead.
    pub terminal: bool,
}

impl Failure {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            terminal: false,
        }
    }

    pub fn terminal(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            terminal: true,
        }
    }
}

/// Bucket sizes for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub ready: usize,
    pub scheduled: usize,
    pub dead: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.ready + self.scheduled + self.dead
    }
}

/// Enqueue, promote, pop and finalise messages.
///
/// Holds no message state of its own; every transition is a single atomic
/// store call, so any number of engines may share one store.
pub struct QueueEngine {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    keys: KeySpace,
    defaults: QueueConfig,
    overrides: HashMap<String, QueueConfig>,
}

impl QueueEngine {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            keys: KeySpace::default(),
            defaults: QueueConfig::default(),
            overrides: HashMap::new(),
        }
    }

    /// Engine with the key prefix, defaults and per-queue overrides of `config`.
    pub fn from_config(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, config: &Config) -> Self {
        let overrides = config
            .queues
            .keys()
            .map(|name| (name.clone(), config.queue_config(name)))
            .collect();
        Self {
            store,
            clock,
            keys: KeySpace::new(config.store.key_prefix.clone()),
            defaults: config.queue.clone(),
            overrides,
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.keys = KeySpace::new(prefix);
        self
    }

    pub fn with_defaults(mut self, defaults: QueueConfig) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_queue_config(mut self, queue: impl Into<String>, config: QueueConfig) -> Self {
        self.overrides.insert(queue.into(), config);
        self
    }

    pub fn queue_config(&self, queue: &str) -> &QueueConfig {
        self.overrides.get(queue).unwrap_or(&self.defaults)
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    pub fn store(&self) -> Arc<dyn KvStore> {
        self.store.clone()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Add a message to `queue`.
    ///
    /// A message due now goes to *ready*, a later one to *scheduled*. A live
    /// dedup record for the fingerprint does not block the insert; the
    /// duplicate is dropped when it is processed.
    pub async fn enqueue(
        &self,
        queue: &str,
        job_type: &str,
        payload: Value,
        options: EnqueueOptions,
    ) -> Result<Envelope, QueueError> {
        validate_queue(queue)?;
        if job_type.trim().is_empty() {
            return Err(QueueError::InvalidArgument(
                "job type cannot be empty".to_string(),
            ));
        }

        let now = self.clock.now();
        let due_at = match (options.due_at, options.delay) {
            (Some(at), _) => at,
            (None, Some(delay)) => expiry_after(now, delay),
            (None, None) => now,
        };
        let fp = match options.fingerprint {
            Some(fp) if !fp.is_empty() => fp,
            _ => fingerprint(queue, job_type, &payload),
        };
        let max_retries = options
            .max_retries
            .unwrap_or(self.queue_config(queue).max_retries);

        let envelope = Envelope::new(queue, job_type, payload, fp, max_retries, due_at, now);

        if self.store.exists(&self.keys.dedup(&envelope.fingerprint)).await? {
            warn!(
                "Job {} on {} matches completed fingerprint {}; it will be dropped as a duplicate",
                envelope.id, queue, envelope.fingerprint
            );
        }

        let encoded = envelope.encode()?;
        if envelope.due_at > now {
            self.store
                .zset_add(
                    &self.keys.bucket(queue, Bucket::Scheduled),
                    envelope.due_at.timestamp_millis(),
                    &encoded,
                )
                .await?;
            debug!("Scheduled job {} on {} due at {}", envelope.id, queue, envelope.due_at);
        } else {
            self.store
                .list_push(&self.keys.bucket(queue, Bucket::Ready), &encoded)
                .await?;
            debug!("Enqueued {} job {} on {}", job_type, envelope.id, queue);
        }

        Ok(envelope)
    }

    /// Promote up to `limit` due messages from *scheduled* to *ready*.
    pub async fn flush_due(&self, queue: &str, limit: usize) -> Result<usize, QueueError> {
        validate_queue(queue)?;
        if limit == 0 {
            return Ok(0);
        }

        let moved = self
            .store
            .zset_move_due(
                &self.keys.bucket(queue, Bucket::Scheduled),
                &self.keys.bucket(queue, Bucket::Ready),
                self.clock.now_millis(),
                limit,
            )
            .await?;

        if !moved.is_empty() {
            debug!("Promoted {} scheduled jobs on {}", moved.len(), queue);
        }
        Ok(moved.len())
    }

    /// Remove up to `count` messages from *ready*.
    ///
    /// Entries that do not decode are moved verbatim to *dead*.
    pub async fn pop(&self, queue: &str, count: usize) -> Result<Vec<Envelope>, QueueError> {
        validate_queue(queue)?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let raw = self
            .store
            .list_pop(&self.keys.bucket(queue, Bucket::Ready), count)
            .await?;

        let mut batch = Vec::with_capacity(raw.len());
        for entry in raw {
            match Envelope::decode(&entry) {
                Ok(envelope) => batch.push(envelope),
                Err(e) => {
                    error!("Unreadable job in ready bucket of {}, moving to dead: {}", queue, e);
                    if let Err(e) = self
                        .store
                        .list_push(&self.keys.bucket(queue, Bucket::Dead), &entry)
                        .await
                    {
                        error!("Failed to dead-letter unreadable job on {}: {}", queue, e);
                    }
                }
            }
        }

        Ok(batch)
    }

    /// Whether a job with this queue, type and payload was completed within
    /// the dedup TTL.
    pub async fn is_duplicate(
        &self,
        queue: &str,
        job_type: &str,
        payload: &Value,
    ) -> Result<bool, QueueError> {
        validate_queue(queue)?;
        self.is_duplicate_fingerprint(&fingerprint(queue, job_type, payload))
            .await
    }

    pub async fn is_duplicate_fingerprint(&self, fingerprint: &str) -> Result<bool, QueueError> {
        Ok(self.store.exists(&self.keys.dedup(fingerprint)).await?)
    }

    /// Record a successful run so later jobs with the same fingerprint are
    /// dropped until the dedup TTL lapses.
    pub async fn mark_completed(&self, envelope: &Envelope) -> Result<Resolution, QueueError> {
        let ttl_secs = self.queue_config(&envelope.queue).dedup_ttl_secs;
        if ttl_secs > 0 {
            self.store
                .set_with_ttl(
                    &self.keys.dedup(&envelope.fingerprint),
                    &envelope.id.to_string(),
                    Duration::from_secs(ttl_secs),
                )
                .await?;
        }
        debug!("Job {} on {} completed", envelope.id, envelope.queue);
        Ok(Resolution::Dropped)
    }

    /// Reschedule a failed message with backoff, or dead-letter it once its
    /// retries are used up.
    pub async fn retry_or_deadletter(
        &self,
        mut envelope: Envelope,
        failure: Failure,
    ) -> Result<Resolution, QueueError> {
        validate_queue(&envelope.queue)?;
        envelope.last_error = Some(failure.reason);

        if !failure.terminal {
            envelope.attempts = envelope.attempts.saturating_add(1);
            if envelope.can_retry() {
                let delay = backoff(self.queue_config(&envelope.queue), envelope.attempts);
                envelope.due_at = expiry_after(self.clock.now(), delay);
                self.store
                    .zset_add(
                        &self.keys.bucket(&envelope.queue, Bucket::Scheduled),
                        envelope.due_at.timestamp_millis(),
                        &envelope.encode()?,
                    )
                    .await?;
                debug!(
                    "Retrying job {} on {} (attempt {}) at {}",
                    envelope.id, envelope.queue, envelope.attempts, envelope.due_at
                );
                return Ok(Resolution::Rescheduled {
                    due_at: envelope.due_at,
                    attempts: envelope.attempts,
                });
            }
        }

        self.store
            .list_push(
                &self.keys.bucket(&envelope.queue, Bucket::Dead),
                &envelope.encode()?,
            )
            .await?;
        info!(
            "Moving job {} on {} to dead letter queue after {} attempts: {}",
            envelope.id,
            envelope.queue,
            envelope.attempts,
            envelope.last_error.as_deref().unwrap_or_default()
        );
        Ok(Resolution::DeadLettered {
            attempts: envelope.attempts,
        })
    }

    /// Move up to `count` dead messages back to *ready*, envelopes unchanged.
    pub async fn retry_deadletter(&self, queue: &str, count: usize) -> Result<usize, QueueError> {
        validate_queue(queue)?;
        if count == 0 {
            return Ok(0);
        }

        let moved = self
            .store
            .list_move(
                &self.keys.bucket(queue, Bucket::Dead),
                &self.keys.bucket(queue, Bucket::Ready),
                count,
            )
            .await?;
        info!("Requeued {} dead-lettered jobs on {}", moved.len(), queue);
        Ok(moved.len())
    }

    /// Bucket sizes. Each count is read separately, so the three are not a
    /// consistent snapshot while other callers are active.
    pub async fn stats(&self, queue: &str) -> Result<QueueStats, QueueError> {
        validate_queue(queue)?;
        Ok(QueueStats {
            ready: self
                .store
                .list_len(&self.keys.bucket(queue, Bucket::Ready))
                .await?,
            scheduled: self
                .store
                .zset_len(&self.keys.bucket(queue, Bucket::Scheduled))
                .await?,
            dead: self
                .store
                .list_len(&self.keys.bucket(queue, Bucket::Dead))
                .await?,
        })
    }
}

pub(crate) fn validate_queue(queue: &str) -> Result<(), QueueError> {
    if is_valid_queue_name(queue) {
        Ok(())
    } else {
        Err(QueueError::InvalidQueueName(queue.to_string()))
    }
}

/// Delay before retry number `attempts`: `retry_delay * 2^(attempts - 1)`,
/// capped at `max_retry_delay` and never below one second.
pub fn backoff(config: &QueueConfig, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(32);
    let secs = config
        .retry_delay_secs
        .saturating_mul(1u64 << exponent)
        .min(config.max_retry_delay_secs)
        .max(1);
    Duration::from_secs(secs)
}
