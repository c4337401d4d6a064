//! Cron triggers that run processing cycles from a long-lived process.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use forklift_config::TriggerConfig;
use forklift_queue::{CycleOutcome, Processor};
use forklift_store::Clock;
use tokio::sync::watch;
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;

struct Trigger {
    queue: String,
    schedule: Schedule,
    drain: bool,
    last_run: DateTime<Utc>,
}

/// Periodically checks cron triggers and runs the matching queue cycles.
///
/// Every instance competes for the same per-queue lock, so running the
/// scheduler in several processes is safe.
pub struct CycleScheduler {
    processor: Arc<Processor>,
    triggers: Vec<Trigger>,
    check_interval: Duration,
}

impl CycleScheduler {
    /// Build from configured triggers. Triggers with an invalid cron
    /// expression are logged and skipped.
    pub fn new(processor: Arc<Processor>, triggers: &[TriggerConfig]) -> Self {
        let now = processor.engine().clock().now();
        let triggers = triggers
            .iter()
            .filter_map(|t| match Schedule::from_str(&t.schedule) {
                Ok(schedule) => Some(Trigger {
                    queue: t.queue.clone(),
                    schedule,
                    drain: t.drain,
                    last_run: now,
                }),
                Err(e) => {
                    warn!(
                        "Invalid cron expression for queue '{}': {} - {}",
                        t.queue, t.schedule, e
                    );
                    None
                }
            })
            .collect();

        Self {
            processor,
            triggers,
            check_interval: Duration::from_secs(1),
        }
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn trigger_count(&self) -> usize {
        self.triggers.len()
    }

    /// Run until `cancel` changes.
    pub async fn run(mut self, mut cancel: watch::Receiver<bool>) {
        info!(
            "Cycle scheduler started with {} triggers (check interval: {:?})",
            self.triggers.len(),
            self.check_interval
        );

        let mut interval = time::interval(self.check_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = self.processor.engine().clock().now();
                    self.run_due(now).await;
                }
                _ = cancel.changed() => {
                    info!("Cycle scheduler shutting down");
                    break;
                }
            }
        }
    }

    /// Run every trigger whose next fire time after its last run is not
    /// later than `now`. Returns how many triggers fired.
    async fn run_due(&mut self, now: DateTime<Utc>) -> usize {
        let mut fired = 0;

        for trigger in &mut self.triggers {
            let next = trigger.schedule.after(&trigger.last_run).next();
            if !matches!(next, Some(next) if next <= now) {
                continue;
            }
            trigger.last_run = now;
            fired += 1;

            debug!("Trigger for queue '{}' is due", trigger.queue);
            let result = if trigger.drain {
                self.processor
                    .drain(&trigger.queue, self.processor.config().max_drain_cycles)
                    .await
            } else {
                self.processor.run_cycle(&trigger.queue).await
            };

            match result {
                Ok(CycleOutcome::Completed(report)) => debug!(
                    "Scheduled cycle for '{}': {} processed, {} failed",
                    trigger.queue, report.processed, report.failed
                ),
                Ok(CycleOutcome::Skipped { reason }) => {
                    debug!("Scheduled cycle for '{}' skipped: {}", trigger.queue, reason)
                }
                Err(e) => error!("Scheduled cycle for '{}' failed: {}", trigger.queue, e),
            }
        }

        fired
    }
}
