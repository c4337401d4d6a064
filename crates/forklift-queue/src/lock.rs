//! TTL-bound distributed lock.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use forklift_store::KvStore;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::keys::KeySpace;

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;

/// Why a locked section did not run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another holder has the lock.
    Contended,
    /// The store could not be reached, so ownership is unknown.
    StoreUnavailable(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Contended => write!(f, "lock held by another caller"),
            SkipReason::StoreUnavailable(e) => write!(f, "store unavailable: {}", e),
        }
    }
}

/// Result of [`DistributedLock::with_lock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome<T> {
    Acquired(T),
    Skipped(SkipReason),
}

impl<T> LockOutcome<T> {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockOutcome::Acquired(_))
    }

    pub fn acquired(self) -> Option<T> {
        match self {
            LockOutcome::Acquired(value) => Some(value),
            LockOutcome::Skipped(_) => None,
        }
    }
}

/// Mutual exclusion across processes sharing one store.
///
/// The lock fails closed: if the store cannot confirm ownership the section
/// is skipped. Holders are identified by a random token, so a holder whose
/// TTL lapsed cannot release a successor's lock. There is no renewal; a
/// section that outlives its TTL may overlap with the next holder.
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn KvStore>,
    keys: KeySpace,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KvStore>, keys: KeySpace) -> Self {
        Self { store, keys }
    }

    /// Run `f` while holding the lock `name`, or skip it.
    pub async fn with_lock<F, Fut, T>(&self, name: &str, ttl: Duration, f: F) -> LockOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let key = self.keys.lock(name);
        let token = Uuid::new_v4().to_string();

        match self.store.set_if_absent(&key, &token, ttl).await {
            Ok(true) => debug!("Lock {} acquired", name),
            Ok(false) => {
                debug!("Lock {} held elsewhere, skipping", name);
                return LockOutcome::Skipped(SkipReason::Contended);
            }
            Err(e) => {
                warn!("Cannot acquire lock {}, skipping: {}", name, e);
                return LockOutcome::Skipped(SkipReason::StoreUnavailable(e.to_string()));
            }
        }

        let value = f().await;

        match self.store.delete_if_equals(&key, &token).await {
            Ok(true) => debug!("Lock {} released", name),
            Ok(false) => warn!("Lock {} expired before release", name),
            Err(e) => warn!("Failed to release lock {}, it will expire: {}", name, e),
        }

        LockOutcome::Acquired(value)
    }
}
