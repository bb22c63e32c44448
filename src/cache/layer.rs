//! Cache layer that orchestrates caching logic with network fetching.

use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::medium::KeyValueMedium;
use super::store::{CacheEntry, TtlCache};
use super::traits::{AlwaysOnline, CacheResult, Connectivity};
use crate::error::OfflineError;

/// Default time a fetched result stays fresh.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the application and the remote backend,
/// providing transparent caching with offline support.
pub struct CacheLayer<M: KeyValueMedium> {
  store: Arc<TtlCache<M>>,
  connectivity: Arc<dyn Connectivity>,
  /// TTL used by `query_with_cache`
  default_ttl: Duration,
}

impl<M: KeyValueMedium> CacheLayer<M> {
  /// Create a new cache layer over the given store.
  pub fn new(store: TtlCache<M>) -> Self {
    Self {
      store: Arc::new(store),
      connectivity: Arc::new(AlwaysOnline),
      default_ttl: DEFAULT_TTL,
    }
  }

  pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = ttl;
    self
  }

  pub fn with_connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
    self.connectivity = connectivity;
    self
  }

  pub fn store(&self) -> &TtlCache<M> {
    &self.store
  }

  /// [`query_with_cache_ttl`](Self::query_with_cache_ttl) with the default TTL.
  pub async fn query_with_cache<T, E, F, Fut>(&self, key: &str, fetcher: F) -> Result<CacheResult<T>, E>
  where
    T: Serialize + DeserializeOwned,
    E: From<OfflineError> + Display,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
  {
    self.query_with_cache_ttl(key, self.default_ttl, fetcher).await
  }

  /// Fetch with cache-first strategy.
  ///
  /// 1. Offline: serve whatever is cached, ignoring expiry, or fail with `OfflineError`
  /// 2. Fresh cache entry: return it without calling `fetcher`
  /// 3. Otherwise fetch; on success update the cache, on failure fall back
  ///    to the stale entry or propagate the fetcher's error unchanged
  ///
  /// Expired entries are kept until the fetch settles so they can still serve as fallback.
  pub async fn query_with_cache_ttl<T, E, F, Fut>(
    &self,
    key: &str,
    ttl: Duration,
    fetcher: F,
  ) -> Result<CacheResult<T>, E>
  where
    T: Serialize + DeserializeOwned,
    E: From<OfflineError> + Display,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
  {
    let cached: Option<CacheEntry<T>> = self.store.get_entry(key);

    if self.connectivity.is_offline() {
      return match cached {
        Some(entry) => {
          info!(key, "Serving from cache, offline");
          Ok(CacheResult::offline(entry.value, entry.expiry))
        }
        None => {
          warn!(key, "Offline with nothing cached");
          Err(OfflineError.into())
        }
      };
    }

    // Split into fresh hit vs. fallback candidate
    let stale = match cached {
      Some(entry) if entry.is_fresh(self.store.now()) => {
        debug!(key, "Cache hit");
        return Ok(CacheResult::from_cache(entry.value, Some(entry.expiry)));
      }
      other => other,
    };

    match fetcher().await {
      Ok(data) => {
        self.store.set(key, &data, ttl);
        Ok(CacheResult::from_network(data))
      }
      Err(err) => match stale {
        Some(entry) => {
          warn!(key, error = %err, "Serving stale after error");
          Ok(CacheResult::stale(entry.value, entry.expiry))
        }
        None => Err(err),
      },
    }
  }

  /// Drop a cached query, typically after mutating the underlying rows.
  pub fn invalidate(&self, key: &str) {
    self.store.remove(key);
  }

  /// Drop every cached query whose key starts with `prefix`.
  pub fn invalidate_prefix(&self, prefix: &str) {
    self.store.remove_prefix(prefix);
  }

  /// Drop everything, e.g. on logout.
  pub fn clear(&self) {
    self.store.clear();
  }
}

impl<M: KeyValueMedium> Clone for CacheLayer<M> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      connectivity: Arc::clone(&self.connectivity),
      default_ttl: self.default_ttl,
    }
  }
}
