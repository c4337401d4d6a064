//! Processing cycles.

use std::sync::Arc;
use std::time::Duration;

use forklift_config::ProcessorConfig;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::engine::{Failure, QueueEngine, validate_queue};
use crate::envelope::{Envelope, Resolution};
use crate::error::QueueError;
use crate::handler::HandlerRegistry;
use crate::lock::{DistributedLock, LockOutcome, SkipReason};

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;

/// Counts from one or more processing cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Scheduled messages promoted to ready.
    pub flushed: usize,
    /// Messages taken from ready.
    pub popped: usize,
    /// Handler succeeded.
    pub processed: usize,
    /// Handler failed or no handler exists.
    pub failed: usize,
    /// Dropped without running because the fingerprint was already completed.
    pub duplicates: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub cycles: u32,
}

impl CycleReport {
    fn absorb(&mut self, other: &CycleReport) {
        self.flushed += other.flushed;
        self.popped += other.popped;
        self.processed += other.processed;
        self.failed += other.failed;
        self.duplicates += other.duplicates;
        self.retried += other.retried;
        self.dead_lettered += other.dead_lettered;
        self.cycles += other.cycles;
    }
}

/// Result of [`Processor::run_cycle`] and [`Processor::drain`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    Completed(CycleReport),
    Skipped { reason: SkipReason },
}

/// Runs locked flush, pop and dispatch cycles against one queue at a time.
pub struct Processor {
    engine: Arc<QueueEngine>,
    registry: Arc<HandlerRegistry>,
    lock: DistributedLock,
    config: ProcessorConfig,
}

impl Processor {
    pub fn new(
        engine: Arc<QueueEngine>,
        registry: Arc<HandlerRegistry>,
        config: ProcessorConfig,
    ) -> Self {
        let lock = DistributedLock::new(engine.store(), engine.keys().clone());
        Self {
            engine,
            registry,
            lock,
            config,
        }
    }

    pub fn engine(&self) -> &Arc<QueueEngine> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Run one cycle under the `{queue}-processor` lock.
    ///
    /// A held or unreachable lock yields [`CycleOutcome::Skipped`]. A store
    /// failure while flushing or popping aborts the cycle with an error;
    /// failures while finalising single messages are logged and the batch
    /// continues.
    pub async fn run_cycle(&self, queue: &str) -> Result<CycleOutcome, QueueError> {
        validate_queue(queue)?;

        let lock_name = format!("{}-processor", queue);
        let ttl = Duration::from_secs(self.config.lock_ttl_secs);

        match self.lock.with_lock(&lock_name, ttl, || self.cycle(queue)).await {
            LockOutcome::Acquired(result) => result.map(CycleOutcome::Completed),
            LockOutcome::Skipped(reason) => {
                info!("Skipping cycle for queue {}: {}", queue, reason);
                Ok(CycleOutcome::Skipped { reason })
            }
        }
    }

    /// Run cycles until a batch comes back short or `max_cycles` is reached.
    ///
    /// Stops early, keeping the counts so far, if a later cycle is skipped.
    pub async fn drain(&self, queue: &str, max_cycles: u32) -> Result<CycleOutcome, QueueError> {
        let mut total = CycleReport::default();

        for _ in 0..max_cycles.max(1) {
            let report = match self.run_cycle(queue).await? {
                CycleOutcome::Completed(report) => report,
                CycleOutcome::Skipped { reason } if total.cycles == 0 => {
                    return Ok(CycleOutcome::Skipped { reason });
                }
                CycleOutcome::Skipped { .. } => break,
            };
            total.absorb(&report);

            let backlog = report.popped >= self.config.batch_size
                || report.flushed >= self.config.flush_limit;
            if !backlog {
                break;
            }
        }

        info!(
            "Drained queue {} in {} cycles: {} processed, {} failed",
            queue, total.cycles, total.processed, total.failed
        );
        Ok(CycleOutcome::Completed(total))
    }

    async fn cycle(&self, queue: &str) -> Result<CycleReport, QueueError> {
        let flushed = self.engine.flush_due(queue, self.config.flush_limit).await?;
        let batch = self.engine.pop(queue, self.config.batch_size).await?;

        let mut report = CycleReport {
            flushed,
            popped: batch.len(),
            cycles: 1,
            ..Default::default()
        };

        for envelope in batch {
            self.process_one(envelope, &mut report).await;
        }

        info!(
            "Cycle on {} complete: {} flushed, {} processed, {} failed, {} duplicates, {} dead-lettered",
            queue,
            report.flushed,
            report.processed,
            report.failed,
            report.duplicates,
            report.dead_lettered
        );
        Ok(report)
    }

    async fn process_one(&self, envelope: Envelope, report: &mut CycleReport) {
        match self
            .engine
            .is_duplicate_fingerprint(&envelope.fingerprint)
            .await
        {
            Ok(true) => {
                debug!("Dropping duplicate job {} ({})", envelope.id, envelope.fingerprint);
                report.duplicates += 1;
                return;
            }
            Ok(false) => {}
            // Running the job again is preferred over losing it.
            Err(e) => warn!("Duplicate check failed for job {}: {}", envelope.id, e),
        }

        let handler = match self.registry.resolve(&envelope.job_type) {
            Ok(handler) => handler,
            Err(e) => {
                warn!("No handler for job {}: {}", envelope.id, e);
                self.fail(envelope, Failure::terminal(e.to_string()), report)
                    .await;
                return;
            }
        };

        match handler.handle(&envelope.payload).await {
            Ok(()) => {
                report.processed += 1;
                if let Err(e) = self.engine.mark_completed(&envelope).await {
                    error!("Failed to record completion of job {}: {}", envelope.id, e);
                }
            }
            Err(e) => {
                debug!("Job {} failed: {}", envelope.id, e);
                self.fail(envelope, Failure::retryable(e.to_string()), report)
                    .await;
            }
        }
    }

    async fn fail(&self, envelope: Envelope, failure: Failure, report: &mut CycleReport) {
        report.failed += 1;
        let id = envelope.id;

        match self.engine.retry_or_deadletter(envelope, failure).await {
            Ok(Resolution::Rescheduled { .. }) => report.retried += 1,
            Ok(Resolution::DeadLettered { .. }) => report.dead_lettered += 1,
            Ok(Resolution::Dropped) => {}
            Err(e) => error!("Failed to reschedule job {}, job is lost: {}", id, e),
        }
    }
}
