//! Application state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use forklift_queue::{Processor, QueueEngine};

/// State shared across handlers.
pub struct AppState {
    pub processor: Arc<Processor>,
    start_time: Instant,
    cycles_triggered: AtomicU64,
}

impl AppState {
    pub fn new(processor: Arc<Processor>) -> Self {
        Self {
            processor,
            start_time: Instant::now(),
            cycles_triggered: AtomicU64::new(0),
        }
    }

    pub fn engine(&self) -> &Arc<QueueEngine> {
        self.processor.engine()
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Processing requests received over HTTP since start.
    pub fn cycles_triggered(&self) -> u64 {
        self.cycles_triggered.load(Ordering::Relaxed)
    }

    pub(crate) fn record_cycle_request(&self) {
        self.cycles_triggered.fetch_add(1, Ordering::Relaxed);
    }
}
