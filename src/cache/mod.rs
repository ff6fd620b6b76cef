//! Time-limited snapshot cache persisted in a local key/value store
//!
//! Entries are stored as `{data, timestamp, version}` JSON objects. Reads of
//! expired, corrupt or foreign-version entries remove the entry and report a
//! miss; store failures are logged and never surface to the caller.

mod store;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::DEFAULT_CACHE_TTL;

pub use store::*;

/// Bumped whenever the shape of a cached payload changes
pub const CACHE_VERSION: u32 = 1;

/// Keys of the persisted snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Contacts,
    Users,
    Stats,
}

impl CacheKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKey::Contacts => "cached_contacts",
            CacheKey::Users => "cached_users",
            CacheKey::Stats => "cached_stats",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry<T> {
    data: T,
    timestamp: i64,
    #[serde(default)]
    version: u32,
}

/// Cache with a fixed time-to-live over a [`KeyValueStore`]
#[derive(Clone)]
pub struct TtlCache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl TtlCache {
    /// Cache with the default five minute lifetime and the system clock
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), DEFAULT_CACHE_TTL)
    }

    pub fn with_clock(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    /// In-memory cache, nothing persists past the process
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached payload for `key`, if present and still fresh
    pub fn get<T: DeserializeOwned>(&self, key: CacheKey) -> Option<T> {
        let raw = match self.store.get_item(key.as_str()) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Error reading cache {}: {}", key.as_str(), e);
                return None;
            }
        };

        let entry: CacheEntry<serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Discarding corrupt cache entry {}: {}", key.as_str(), e);
                self.invalidate(key);
                return None;
            }
        };

        if entry.version != CACHE_VERSION {
            debug!(
                "Discarding cache entry {} with version {} (current {})",
                key.as_str(),
                entry.version,
                CACHE_VERSION
            );
            self.invalidate(key);
            return None;
        }

        let age = self.clock.now_millis().saturating_sub(entry.timestamp);
        if age >= self.ttl.as_millis() as i64 {
            debug!("Cache entry {} expired ({} ms old)", key.as_str(), age);
            self.invalidate(key);
            return None;
        }

        match serde_json::from_value(entry.data) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!("Cache entry {} has an unexpected shape: {}", key.as_str(), e);
                self.invalidate(key);
                None
            }
        }
    }

    /// Store `data` under `key`, stamped with the current time
    pub fn set<T: Serialize>(&self, key: CacheKey, data: &T) {
        let entry = CacheEntry {
            data,
            timestamp: self.clock.now_millis(),
            version: CACHE_VERSION,
        };
        let result = serde_json::to_string(&entry)
            .map_err(crate::error::Error::from)
            .and_then(|text| self.store.set_item(key.as_str(), &text));
        if let Err(e) = result {
            warn!("Error setting cache {}: {}", key.as_str(), e);
        }
    }

    /// Drop the entry for `key`; absent keys are fine
    pub fn invalidate(&self, key: CacheKey) {
        if let Err(e) = self.store.remove_item(key.as_str()) {
            warn!("Error invalidating cache {}: {}", key.as_str(), e);
        }
    }
}
