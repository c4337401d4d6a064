//! # Forklift API
//!
//! External surfaces for the job queue:
//! - **HTTP**: trigger processing cycles, enqueue jobs, read stats, requeue
//!   dead letters
//! - **Scheduler**: cron triggers that run processing cycles in-process
//!
//! ## Route Structure
//!
//! ```text
//! POST /queues/{queue}/process     - Run one cycle (?drain=true to drain)
//! POST /queues/{queue}/jobs        - Enqueue a job
//! GET  /queues/{queue}/stats       - Bucket sizes
//! POST /queues/{queue}/dead/retry  - Requeue dead letters
//! GET  /health                     - Liveness and version
//! ```

pub mod error;
pub mod http;
pub mod scheduler;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use http::routes::create_router;
pub use scheduler::CycleScheduler;
pub use server::ApiServer;
pub use state::AppState;
