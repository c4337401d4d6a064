//! Store key layout.
//!
//! ```text
//! {prefix}:q:{queue}:ready        list, envelope JSON
//! {prefix}:q:{queue}:scheduled    sorted set, score = due time in ms
//! {prefix}:q:{queue}:dead         list, envelope JSON
//! {prefix}:dedup:{fingerprint}    TTL key, id of the completed message
//! {prefix}:lock:{name}            TTL key, holder token
//! ```
//!
//! Each kind of key has its own second segment, so no queue name, lock name
//! or fingerprint can produce another kind's key.

use serde::{Deserialize, Serialize};

/// The three per-queue buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Scheduled,
    Ready,
    Dead,
}

impl Bucket {
    pub fn as_str(self) -> &'static str {
        match self {
            Bucket::Scheduled => "scheduled",
            Bucket::Ready => "ready",
            Bucket::Dead => "dead",
        }
    }
}

/// Builds every key the queue touches under one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn bucket(&self, queue: &str, bucket: Bucket) -> String {
        format!("{}:q:{}:{}", self.prefix, queue, bucket.as_str())
    }

    pub fn dedup(&self, fingerprint: &str) -> String {
        format!("{}:dedup:{}", self.prefix, fingerprint)
    }

    pub fn lock(&self, name: &str) -> String {
        format!("{}:lock:{}", self.prefix, name)
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new("forklift")
    }
}
