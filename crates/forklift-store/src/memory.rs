//! In-memory store.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock, expiry_after};
use crate::error::StoreError;
use crate::traits::KvStore;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Minimum time between full scans for expired TTL values.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct TtlValue {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct SortedSet {
    /// (score, insertion seq) -> member
    by_score: BTreeMap<(i64, u64), String>,
    /// member -> (score, insertion seq)
    by_member: HashMap<String, (i64, u64)>,
}

impl SortedSet {
    fn insert(&mut self, score: i64, seq: u64, member: &str) {
        if let Some(old) = self.by_member.remove(member) {
            self.by_score.remove(&old);
        }
        self.by_score.insert((score, seq), member.to_string());
        self.by_member.insert(member.to_string(), (score, seq));
    }

    fn pop_due(&mut self, max_score: i64, limit: usize) -> Vec<String> {
        let due: Vec<(i64, u64)> = self
            .by_score
            .range(..=(max_score, u64::MAX))
            .take(limit)
            .map(|(k, _)| *k)
            .collect();

        let mut out = Vec::with_capacity(due.len());
        for key in due {
            if let Some(member) = self.by_score.remove(&key) {
                self.by_member.remove(&member);
                out.push(member);
            }
        }
        out
    }

    fn len(&self) -> usize {
        self.by_score.len()
    }
}

#[derive(Default)]
struct Inner {
    lists: HashMap<String, VecDeque<String>>,
    zsets: HashMap<String, SortedSet>,
    values: HashMap<String, TtlValue>,
    seq: u64,
    next_sweep: Option<DateTime<Utc>>,
}

impl Inner {
    fn live_value(&mut self, key: &str, now: DateTime<Utc>) -> Option<&TtlValue> {
        let expired = self.values.get(key).is_some_and(|v| v.expires_at <= now);
        if expired {
            self.values.remove(key);
        }
        self.values.get(key)
    }

    /// Drop every expired value, at most once per `SWEEP_INTERVAL`.
    fn sweep_expired(&mut self, now: DateTime<Utc>) {
        if self.next_sweep.is_some_and(|at| now < at) {
            return;
        }
        self.values.retain(|_, v| v.expires_at > now);
        self.next_sweep = Some(expiry_after(now, SWEEP_INTERVAL));
    }

    fn pop_front(&mut self, key: &str, count: usize) -> Vec<String> {
        let Some(list) = self.lists.get_mut(key) else {
            return Vec::new();
        };
        let n = count.min(list.len());
        let out: Vec<String> = list.drain(..n).collect();
        if list.is_empty() {
            self.lists.remove(key);
        }
        out
    }

    fn push_back(&mut self, key: &str, values: impl IntoIterator<Item = String>) {
        self.lists.entry(key.to_string()).or_default().extend(values);
    }
}

/// Process-local store.
///
/// Every operation takes a single mutex, so each call is atomic with respect
/// to the others. Expiry is evaluated against the injected clock on read, and
/// writes periodically drop every expired value.
pub struct MemoryKvStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    offline: AtomicBool,
}

impl MemoryKvStore {
    /// Create an empty store on the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store using the given clock for expiry.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
            offline: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail with `StoreError::Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn list_push(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check_online()?;
        self.inner.lock().push_back(key, [value.to_string()]);
        Ok(())
    }

    async fn list_pop(&self, key: &str, count: usize) -> Result<Vec<String>, StoreError> {
        self.check_online()?;
        Ok(self.inner.lock().pop_front(key, count))
    }

    async fn list_len(&self, key: &str) -> Result<usize, StoreError> {
        self.check_online()?;
        Ok(self.inner.lock().lists.get(key).map_or(0, VecDeque::len))
    }

    async fn list_move(
        &self,
        src: &str,
        dst: &str,
        count: usize,
    ) -> Result<Vec<String>, StoreError> {
        self.check_online()?;
        let mut inner = self.inner.lock();
        let moved = inner.pop_front(src, count);
        inner.push_back(dst, moved.iter().cloned());
        Ok(moved)
    }

    async fn zset_add(&self, key: &str, score: i64, member: &str) -> Result<(), StoreError> {
        self.check_online()?;
        let mut inner = self.inner.lock();
        inner.seq += 1;
        let seq = inner.seq;
        inner
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(score, seq, member);
        Ok(())
    }

    async fn zset_len(&self, key: &str) -> Result<usize, StoreError> {
        self.check_online()?;
        Ok(self.inner.lock().zsets.get(key).map_or(0, SortedSet::len))
    }

    async fn zset_move_due(
        &self,
        src: &str,
        dst: &str,
        max_score: i64,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        self.check_online()?;
        let mut inner = self.inner.lock();
        let moved = match inner.zsets.get_mut(src) {
            Some(set) => set.pop_due(max_score, limit),
            None => return Ok(Vec::new()),
        };
        if inner.zsets.get(src).is_some_and(|s| s.len() == 0) {
            inner.zsets.remove(src);
        }
        inner.push_back(dst, moved.iter().cloned());
        Ok(moved)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.check_online()?;
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.sweep_expired(now);
        if inner.live_value(key, now).is_some() {
            return Ok(false);
        }
        inner.values.insert(
            key.to_string(),
            TtlValue {
                value: value.to_string(),
                expires_at: expiry_after(now, ttl),
            },
        );
        Ok(true)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check_online()?;
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.sweep_expired(now);
        inner.values.insert(
            key.to_string(),
            TtlValue {
                value: value.to_string(),
                expires_at: expiry_after(now, ttl),
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check_online()?;
        let now = self.clock.now();
        Ok(self.inner.lock().live_value(key, now).is_some())
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        self.check_online()?;
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let matches = inner.live_value(key, now).is_some_and(|v| v.value == value);
        if matches {
            inner.values.remove(key);
        }
        Ok(matches)
    }
}
