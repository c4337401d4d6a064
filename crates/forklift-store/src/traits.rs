//! The key-value contract the queue relies on.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// Key-value store primitives.
///
/// Every method is atomic on its own. No method spans a multi-call
/// transaction; operations that touch two keys (`list_move`,
/// `zset_move_due`) are single primitives so callers never need a
/// client-side read-modify-write.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Append a value at the tail of a list.
    async fn list_push(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove and return up to `count` values from the head of a list.
    async fn list_pop(&self, key: &str, count: usize) -> Result<Vec<String>, StoreError>;

    /// Number of values in a list.
    async fn list_len(&self, key: &str) -> Result<usize, StoreError>;

    /// Pop up to `count` values from the head of `src` and push them onto the
    /// tail of `dst`. Returns the moved values.
    async fn list_move(
        &self,
        src: &str,
        dst: &str,
        count: usize,
    ) -> Result<Vec<String>, StoreError>;

    /// Add a member with a score, replacing the score if the member exists.
    async fn zset_add(&self, key: &str, score: i64, member: &str) -> Result<(), StoreError>;

    /// Number of members in a sorted set.
    async fn zset_len(&self, key: &str) -> Result<usize, StoreError>;

    /// Remove up to `limit` members with `score <= max_score` (lowest first)
    /// and push them onto the tail of the list `dst`.
    async fn zset_move_due(
        &self,
        src: &str,
        dst: &str,
        max_score: i64,
        limit: usize,
    ) -> Result<Vec<String>, StoreError>;

    /// Set `key` only if it does not exist (or has expired). Returns whether
    /// the value was written.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Set `key` unconditionally with an expiry.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Whether a live (unexpired) key exists.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Delete `key` only if it currently holds `value`.
    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, StoreError>;
}
