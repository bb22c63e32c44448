//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Runtime connectivity signal consulted before any network call.
pub trait Connectivity: Send + Sync {
  fn is_offline(&self) -> bool;
}

/// Connectivity that always reports online.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
  fn is_offline(&self) -> bool {
    false
  }
}

/// Shared, externally toggled offline flag.
#[derive(Debug, Clone, Default)]
pub struct OfflineFlag(Arc<AtomicBool>);

impl OfflineFlag {
  pub fn new(offline: bool) -> Self {
    Self(Arc::new(AtomicBool::new(offline)))
  }

  pub fn set_offline(&self, offline: bool) {
    self.0.store(offline, Ordering::SeqCst);
  }
}

impl Connectivity for OfflineFlag {
  fn is_offline(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the cached copy expires(d), if the data came from cache
  pub expires_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      expires_at: None,
    }
  }

  /// Create a new cache result from a fresh cache hit.
  pub fn from_cache(data: T, expires_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      expires_at,
    }
  }

  /// Cached data served because the network call failed.
  pub fn stale(data: T, expires_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::CacheStale,
      expires_at: Some(expires_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, expires_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      expires_at: Some(expires_at),
    }
  }

  pub fn is_degraded(&self) -> bool {
    matches!(self.source, CacheSource::CacheStale | CacheSource::Offline)
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheResult<U> {
    CacheResult {
      data: f(self.data),
      source: self.source,
      expires_at: self.expires_at,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache served after the network fetch failed
  CacheStale,
  /// Offline mode - network unavailable, serving cached data
  Offline,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let label = match self {
      Self::Network => "network",
      Self::CacheFresh => "cache",
      Self::CacheStale => "stale cache",
      Self::Offline => "offline cache",
    };
    f.write_str(label)
  }
}
