//! Query cache: hierarchical keys, invalidation, and a small in-memory store.
//!
//! Keys form a path (`crowdfunding / campaigns / 42`). Invalidating a key
//! invalidates every entry below it, so `Campaigns` also drops every cached
//! `Campaign(id)`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::errors::Result;

/// Entries younger than this are served without refetching.
pub const STALE_TIME: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    All,
    Campaigns,
    Campaign(u64),
    Vaults,
    Donations,
    DonationsByUser(String),
    Badges,
    BadgesByUser(String),
}

impl CacheKey {
    pub fn path(&self) -> Vec<String> {
        let root = "crowdfunding".to_string();
        match self {
            Self::All => vec![root],
            Self::Campaigns => vec![root, "campaigns".into()],
            Self::Campaign(id) => vec![root, "campaigns".into(), id.to_string()],
            Self::Vaults => vec![root, "vaults".into()],
            Self::Donations => vec![root, "donations".into()],
            Self::DonationsByUser(addr) => {
                vec![root, "donations".into(), "user".into(), addr.to_lowercase()]
            }
            Self::Badges => vec![root, "badges".into()],
            Self::BadgesByUser(addr) => {
                vec![root, "badges".into(), "user".into(), addr.to_lowercase()]
            }
        }
    }

    /// `true` if `self` is `other` or an ancestor of it.
    pub fn covers(&self, other: &CacheKey) -> bool {
        other.path().starts_with(&self.path())
    }
}

/// The capability transaction flows use to make dependent reads refetch.
pub trait QueryCache: Send + Sync {
    fn invalidate(&self, key: &CacheKey);
}

struct Entry {
    value: Value,
    fetched_at: Instant,
    invalidated: bool,
}

/// In-memory [`QueryCache`] that also serves reads.
pub struct QueryStore {
    entries: RwLock<HashMap<CacheKey, Entry>>,
    stale_time: Duration,
}

impl Default for QueryStore {
    fn default() -> Self {
        Self::new(STALE_TIME)
    }
}

impl QueryStore {
    pub fn new(stale_time: Duration) -> Self {
        QueryStore {
            entries: RwLock::new(HashMap::new()),
            stale_time,
        }
    }

    /// Return the cached value for `key` while fresh, else run `fetch` and cache it.
    pub async fn get_or_fetch<T, F, Fut>(&self, key: CacheKey, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.fresh(&key) {
            if let Ok(hit) = serde_json::from_value(value) {
                debug!("Cache hit for {:?}", key.path());
                return Ok(hit);
            }
        }

        let fetched = fetch().await?;
        let value = serde_json::to_value(&fetched)?;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key,
                Entry {
                    value,
                    fetched_at: Instant::now(),
                    invalidated: false,
                },
            );
        Ok(fetched)
    }

    fn fresh(&self, key: &CacheKey) -> Option<Value> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|e| !e.invalidated && e.fetched_at.elapsed() < self.stale_time)
            .map(|e| e.value.clone())
    }

    #[cfg(test)]
    pub fn is_fresh(&self, key: &CacheKey) -> bool {
        self.fresh(key).is_some()
    }
}

impl QueryCache for QueryStore {
    fn invalidate(&self, key: &CacheKey) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut count = 0;
        for (cached, entry) in entries.iter_mut() {
            if key.covers(cached) {
                entry.invalidated = true;
                count += 1;
            }
        }
        debug!("Invalidated {count} cache entries under {:?}", key.path());
    }
}
