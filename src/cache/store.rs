//! TTL key-value cache over a durable medium.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use super::medium::KeyValueMedium;

/// Default namespace for cache keys in the shared medium.
pub const DEFAULT_PREFIX: &str = "infoline_cache:";

/// Source of the current time.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: Mutex::new(start),
    }
  }

  pub fn advance(&self, by: Duration) {
    let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
    *now += TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap_or_else(|p| p.into_inner())
  }
}

/// Record persisted for every cache key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
  pub value: T,
  /// Absolute expiry; the entry is fresh iff `now < expiry`
  pub expiry: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
  pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
    now < self.expiry
  }
}

/// Cache with per-entry expiry.
///
/// Every medium failure (unavailable storage, corrupt JSON, poisoned lock)
/// is logged and reported as a miss. Writes that fail are dropped.
pub struct TtlCache<M: KeyValueMedium> {
  medium: M,
  prefix: String,
  clock: Arc<dyn Clock>,
  /// Serializes read-modify-write sequences on the medium
  lock: Mutex<()>,
}

impl<M: KeyValueMedium> TtlCache<M> {
  pub fn new(medium: M) -> Self {
    Self {
      medium,
      prefix: DEFAULT_PREFIX.to_string(),
      clock: Arc::new(SystemClock),
      lock: Mutex::new(()),
    }
  }

  pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.prefix = prefix.into();
    self
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn now(&self) -> DateTime<Utc> {
    self.clock.now()
  }

  /// Fresh value for `key`. Expired entries are deleted on the way out.
  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let _guard = self.guard();
    let storage_key = self.namespaced(key);
    let entry: CacheEntry<T> = self.read_entry(&storage_key)?;

    if entry.is_fresh(self.clock.now()) {
      return Some(entry.value);
    }

    debug!(key, expiry = %entry.expiry, "Cache entry expired, removing");
    if let Err(e) = self.medium.remove_item(&storage_key) {
      warn!(key, error = %e, "Failed to remove expired cache entry");
    }
    None
  }

  /// Stored value for `key` regardless of expiry. Never deletes.
  pub fn get_stale<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    self.get_entry(key).map(|entry| entry.value)
  }

  /// Stored entry for `key` regardless of expiry, with its expiry.
  pub fn get_entry<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
    let _guard = self.guard();
    self.read_entry(&self.namespaced(key))
  }

  /// Store `value` under `key` until `now + ttl`.
  pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
    let now = self.clock.now();
    let expiry = TimeDelta::from_std(ttl)
      .ok()
      .and_then(|ttl| now.checked_add_signed(ttl))
      .unwrap_or(DateTime::<Utc>::MAX_UTC);

    let raw = match serde_json::to_string(&CacheEntry { value, expiry }) {
      Ok(raw) => raw,
      Err(e) => {
        warn!(key, error = %e, "Failed to serialize cache entry, skipping");
        return;
      }
    };

    let _guard = self.guard();
    if let Err(e) = self.medium.set_item(&self.namespaced(key), &raw) {
      warn!(key, error = %e, "Failed to write cache entry");
    }
  }

  /// Invalidate a single key.
  pub fn remove(&self, key: &str) {
    let _guard = self.guard();
    if let Err(e) = self.medium.remove_item(&self.namespaced(key)) {
      warn!(key, error = %e, "Failed to remove cache entry");
    }
  }

  /// Invalidate every key starting with `key_prefix` (before namespacing).
  pub fn remove_prefix(&self, key_prefix: &str) {
    let _guard = self.guard();
    let full_prefix = self.namespaced(key_prefix);
    let keys = match self.medium.keys_with_prefix(&full_prefix) {
      Ok(keys) => keys,
      Err(e) => {
        warn!(prefix = key_prefix, error = %e, "Failed to list cache entries");
        return;
      }
    };

    for key in keys {
      if let Err(e) = self.medium.remove_item(&key) {
        warn!(key, error = %e, "Failed to remove cache entry");
      }
    }
  }

  /// Invalidate everything in this cache's namespace.
  ///
  /// Unrelated data in the same medium is left alone.
  pub fn clear(&self) {
    self.remove_prefix("");
  }

  fn namespaced(&self, key: &str) -> String {
    format!("{}{}", self.prefix, key)
  }

  fn guard(&self) -> MutexGuard<'_, ()> {
    self.lock.lock().unwrap_or_else(|p| p.into_inner())
  }

  fn read_entry<T: DeserializeOwned>(&self, storage_key: &str) -> Option<CacheEntry<T>> {
    let raw = match self.medium.get_item(storage_key) {
      Ok(Some(raw)) => raw,
      Ok(None) => return None,
      Err(e) => {
        warn!(key = storage_key, error = %e, "Cache read failed, treating as miss");
        return None;
      }
    };

    match serde_json::from_str(&raw) {
      Ok(entry) => Some(entry),
      Err(e) => {
        warn!(key = storage_key, error = %e, "Malformed cache entry, treating as miss");
        None
      }
    }
  }
}
