//! # Forklift Store
//!
//! Key-value primitives the job queue is built on.
//!
//! ## Features
//!
//! - Lists with atomic push, pop and cross-key move
//! - Score-ordered sets with atomic "move due members into a list"
//! - TTL keys with set-if-absent and compare-and-delete (locks, dedup records)
//! - In-memory backend for tests and single-process deployments
//! - SQLite backend shared by several processes on one host

pub mod clock;
pub mod error;
pub mod memory;
pub mod sqlite;
pub mod traits;

mod schema;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::StoreError;
pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;
pub use traits::KvStore;
