//! # Forklift Config
//!
//! Configuration management for the Forklift job queue.

mod error;
mod loader;
mod schema;
mod validator;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::{is_valid_queue_name, ConfigValidator, ValidationError, ValidationResult, ValidationWarning};
