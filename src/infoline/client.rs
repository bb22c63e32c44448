//! InfoLine client that routes every read through retry and cache.

use color_eyre::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::backend::{Direction, Page, QueryDescriptor, RemoteBackend};
use crate::cache::{
  CacheLayer, CacheResult, Connectivity, KeyValueMedium, NoopMedium, SqliteMedium, TtlCache,
};
use crate::config::Config;
use crate::error::QueryError;
use crate::retry::{with_retry, with_retry_if, RetryPolicy};

use super::types::{Region, School, Sector, UserProfile, UserRole};

pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// Listing tables, also used as cache key prefixes.
pub const REGIONS: &str = "regions";
pub const SECTORS: &str = "sectors";
pub const SCHOOLS: &str = "schools";
pub const PROFILES: &str = "profiles";

/// Backend client with transparent retry and caching.
///
/// Call order for every read: retry → cache-through → backend.
#[derive(Clone)]
pub struct InfoLineClient {
  backend: Arc<dyn RemoteBackend>,
  cache: CacheLayer<Box<dyn KeyValueMedium>>,
  retry: RetryPolicy,
  /// Give up early on errors a repeat cannot fix
  classify_errors: bool,
  page_size: u64,
}

impl InfoLineClient {
  pub fn new(
    backend: Arc<dyn RemoteBackend>,
    cache: CacheLayer<Box<dyn KeyValueMedium>>,
    retry: RetryPolicy,
  ) -> Self {
    Self {
      backend,
      cache,
      retry,
      classify_errors: true,
      page_size: DEFAULT_PAGE_SIZE,
    }
  }

  /// Build a client from configuration, opening the cache database.
  pub fn from_config(
    config: &Config,
    backend: Arc<dyn RemoteBackend>,
    connectivity: Arc<dyn Connectivity>,
  ) -> Result<Self> {
    let medium: Box<dyn KeyValueMedium> = if config.cache.enabled {
      let path = match &config.cache.path {
        Some(path) => path.clone(),
        None => SqliteMedium::default_path()?,
      };
      Box::new(SqliteMedium::open(&path)?)
    } else {
      Box::new(NoopMedium)
    };

    let store = TtlCache::new(medium).with_prefix(config.cache.prefix.clone());
    let cache = CacheLayer::new(store)
      .with_default_ttl(config.cache.default_ttl())
      .with_connectivity(connectivity);

    Ok(
      Self::new(backend, cache, config.retry.policy())
        .with_error_classification(config.retry.classify_errors),
    )
  }

  pub fn with_error_classification(mut self, classify: bool) -> Self {
    self.classify_errors = classify;
    self
  }

  pub fn with_page_size(mut self, page_size: u64) -> Self {
    self.page_size = page_size.max(1);
    self
  }

  /// List regions by name.
  pub async fn list_regions(&self, page: u64) -> Result<CacheResult<Vec<Region>>, QueryError> {
    let descriptor = QueryDescriptor::select(REGIONS)
      .order("name", Direction::Asc)
      .page(Page::numbered(page, self.page_size)?)
      .build()?;
    self.fetch(&descriptor).await
  }

  /// List sectors of a region by name.
  pub async fn list_sectors(
    &self,
    region_id: &str,
    page: u64,
  ) -> Result<CacheResult<Vec<Sector>>, QueryError> {
    let descriptor = QueryDescriptor::select(SECTORS)
      .eq("region_id", region_id)
      .order("name", Direction::Asc)
      .page(Page::numbered(page, self.page_size)?)
      .build()?;
    self.fetch(&descriptor).await
  }

  /// List schools of a sector by name.
  pub async fn list_schools(
    &self,
    sector_id: &str,
    page: u64,
  ) -> Result<CacheResult<Vec<School>>, QueryError> {
    let descriptor = QueryDescriptor::select(SCHOOLS)
      .eq("sector_id", sector_id)
      .order("name", Direction::Asc)
      .page(Page::numbered(page, self.page_size)?)
      .build()?;
    self.fetch(&descriptor).await
  }

  /// Number of schools in a sector.
  pub async fn count_schools(&self, sector_id: &str) -> Result<CacheResult<u64>, QueryError> {
    let descriptor = QueryDescriptor::count(SCHOOLS)
      .eq("sector_id", sector_id)
      .build()?;
    self.fetch(&descriptor).await
  }

  /// List user profiles, optionally restricted to one role.
  pub async fn list_users(
    &self,
    role: Option<UserRole>,
    page: u64,
  ) -> Result<CacheResult<Vec<UserProfile>>, QueryError> {
    let mut builder = QueryDescriptor::select(PROFILES);
    if let Some(role) = role {
      builder = builder.eq("role", role.as_str());
    }
    let descriptor = builder
      .order("full_name", Direction::Asc)
      .page(Page::numbered(page, self.page_size)?)
      .build()?;
    self.fetch(&descriptor).await
  }

  /// Run any descriptor through retry → cache → backend.
  pub async fn fetch<T>(&self, descriptor: &QueryDescriptor) -> Result<CacheResult<T>, QueryError>
  where
    T: Serialize + DeserializeOwned,
  {
    let key = descriptor.cache_key();
    let key = key.as_str();
    let op = move || {
      self
        .cache
        .query_with_cache(key, move || self.query_backend::<T>(descriptor))
    };

    if self.classify_errors {
      with_retry_if(op, &self.retry, QueryError::is_retryable).await
    } else {
      with_retry(op, &self.retry).await
    }
  }

  /// Drop cached queries for one table, e.g. after a write to it.
  pub fn invalidate_table(&self, table: &str) {
    debug!(table, "Invalidating cached queries");
    self.cache.invalidate_prefix(&format!("{}:", table));
  }

  /// Drop every cached query, e.g. on logout.
  pub fn clear_cache(&self) {
    self.cache.clear();
  }

  async fn query_backend<T: DeserializeOwned>(
    &self,
    descriptor: &QueryDescriptor,
  ) -> Result<T, QueryError> {
    let value = self.backend.query(descriptor).await?;
    Ok(serde_json::from_value(value)?)
  }
}
