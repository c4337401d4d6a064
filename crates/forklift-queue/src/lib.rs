//! # Forklift Queue
//!
//! Background job queue for stateless, concurrently invoked request handlers.
//!
//! ## Features
//!
//! - Named queues with *scheduled*, *ready* and *dead* buckets held entirely
//!   in a key-value store
//! - Delayed jobs promoted by a bounded flush
//! - Fingerprint-based duplicate suppression with a TTL
//! - Retry with capped exponential backoff, then dead letter
//! - Operator requeue of dead letters
//! - TTL-bound distributed lock so only one processing cycle runs per queue
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use forklift_config::ProcessorConfig;
//! use forklift_queue::{
//!     CycleOutcome, EnqueueOptions, HandlerRegistry, Processor, QueueEngine,
//! };
//! use forklift_store::{MemoryKvStore, SystemClock};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryKvStore::new());
//! let engine = Arc::new(QueueEngine::new(store, Arc::new(SystemClock)));
//!
//! engine
//!     .enqueue("alerts", "alert", serde_json::json!({"message": "dock 4 jammed"}), EnqueueOptions::default())
//!     .await?;
//!
//! let registry = Arc::new(HandlerRegistry::new());
//! let processor = Processor::new(engine, registry, ProcessorConfig::default());
//! if let CycleOutcome::Completed(report) = processor.run_cycle("alerts").await? {
//!     println!("processed {}", report.processed);
//! }
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod keys;
pub mod lock;
pub mod processor;

pub use engine::{EnqueueOptions, Failure, QueueEngine, QueueStats};
pub use envelope::{Envelope, MessageState, Resolution, fingerprint};
pub use error::{DispatchError, HandlerError, QueueError};
pub use handler::{HandlerRegistry, JobHandler};
pub use keys::{Bucket, KeySpace};
pub use lock::{DistributedLock, LockOutcome, SkipReason};
pub use processor::{CycleOutcome, CycleReport, Processor};
