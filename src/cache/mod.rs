//! Client-side caching for remote queries.
//!
//! This module provides a backend-agnostic caching mechanism that:
//! - Stores serialized query results in a durable key-value medium under a namespaced key
//! - Expires entries after a per-entry TTL, keeping them readable for stale fallback
//! - Serves cached data when offline or when the network call fails

mod layer;
mod medium;
mod store;
mod traits;

pub use layer::{CacheLayer, DEFAULT_TTL};
pub use medium::{KeyValueMedium, MemoryMedium, NoopMedium, SqliteMedium};
pub use store::{CacheEntry, Clock, ManualClock, SystemClock, TtlCache, DEFAULT_PREFIX};
pub use traits::{AlwaysOnline, CacheResult, CacheSource, Connectivity, OfflineFlag};
