//! Read-through cache for upstream fetches.
//!
//! Entries are keyed by (source, provider station id) and live for a fixed
//! TTL counted from when the upstream call returned. Each key owns a
//! [`tokio::sync::OnceCell`] slot, so concurrent callers for the same key
//! wait on one upstream call and all get its result.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::Error;
use crate::model::{RawRow, SourceTag};

pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

pub type FetchResult = Result<RawRow, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source: SourceTag,
    pub provider_id: String,
}

impl CacheKey {
    pub fn new(source: SourceTag, provider_id: impl Into<String>) -> Self {
        Self {
            source,
            provider_id: provider_id.into(),
        }
    }
}

#[derive(Default)]
struct Slot {
    cell: OnceCell<(Instant, FetchResult)>,
}

impl Slot {
    /// In-flight slots never count as expired.
    fn is_expired(&self, ttl: Duration) -> bool {
        self.cell
            .get()
            .is_some_and(|(stored_at, _)| stored_at.elapsed() >= ttl)
    }
}

pub struct ResultCache {
    ttl: Duration,
    slots: Mutex<HashMap<CacheKey, Arc<Slot>>>,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached result for `key`, calling `fetch` only when there
    /// is no live entry and no call already in flight.
    ///
    /// Successes are kept for the TTL. A failure is handed to everyone who
    /// waited on that call and then evicted, so the next access retries.
    pub async fn get_or_fetch<F, Fut>(&self, key: CacheKey, fetch: F) -> FetchResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult>,
    {
        let slot = self.slot_for(&key);
        let (_, result) = slot
            .cell
            .get_or_init(|| async {
                debug!(
                    source = %key.source,
                    provider_id = %key.provider_id,
                    "Cache miss, fetching upstream"
                );
                let result = fetch().await;
                (Instant::now(), result)
            })
            .await;
        let result = result.clone();

        if result.is_err() {
            self.evict(&key, &slot);
        }
        result
    }

    /// Drops every entry. In-flight calls still complete for their waiters.
    pub fn invalidate_all(&self) {
        let mut slots = self.lock();
        let dropped = slots.len();
        slots.clear();
        debug!(dropped, "Cache invalidated");
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot_for(&self, key: &CacheKey) -> Arc<Slot> {
        let mut slots = self.lock();
        if let Some(slot) = slots.get(key)
            && !slot.is_expired(self.ttl)
        {
            return Arc::clone(slot);
        }
        let slot = Arc::new(Slot::default());
        slots.insert(key.clone(), Arc::clone(&slot));
        slot
    }

    fn evict(&self, key: &CacheKey, slot: &Arc<Slot>) {
        let mut slots = self.lock();
        if slots.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(key);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Arc<Slot>>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
