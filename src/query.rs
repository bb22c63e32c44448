//! Fetch state for views built on [`InfoLineClient`](crate::infoline::InfoLineClient).
//!
//! A `Query<T>` runs one listing at a time on the tokio runtime. The last
//! successful [`CacheResult`] survives a refetch and a failed fetch, so a view
//! keeps its rows (with a stale badge) instead of flashing empty.
//!
//! ```ignore
//! let client = client.clone();
//! let mut regions = Query::new(move || {
//!   let client = client.clone();
//!   async move { client.list_regions(1).await }
//! });
//!
//! regions.fetch();
//!
//! // On each UI tick
//! if regions.poll() {
//!   redraw(regions.data(), regions.is_degraded(), regions.error());
//! }
//! ```

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use tokio::task::{JoinError, JoinHandle};

use crate::cache::{CacheResult, CacheSource};
use crate::error::QueryError;

type Outcome<T> = Result<CacheResult<T>, QueryError>;
type Fetcher<T> = Box<dyn Fn() -> BoxFuture<'static, Outcome<T>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// Never fetched
  Idle,
  Loading,
  /// Last fetch succeeded
  Ready,
  /// Last fetch failed; earlier data may still be shown
  Failed,
}

pub struct Query<T> {
  fetcher: Fetcher<T>,
  pending: Option<JoinHandle<Outcome<T>>>,
  last: Option<CacheResult<T>>,
  error: Option<QueryError>,
}

impl<T: Send + 'static> Query<T> {
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome<T>> + Send + 'static,
  {
    Self {
      fetcher: Box::new(move || fetcher().boxed()),
      pending: None,
      last: None,
      error: None,
    }
  }

  pub fn status(&self) -> QueryStatus {
    if self.pending.is_some() {
      QueryStatus::Loading
    } else if self.error.is_some() {
      QueryStatus::Failed
    } else if self.last.is_some() {
      QueryStatus::Ready
    } else {
      QueryStatus::Idle
    }
  }

  /// Last successful result with its cache metadata.
  pub fn result(&self) -> Option<&CacheResult<T>> {
    self.last.as_ref()
  }

  pub fn data(&self) -> Option<&T> {
    self.last.as_ref().map(|r| &r.data)
  }

  pub fn source(&self) -> Option<CacheSource> {
    self.last.as_ref().map(|r| r.source)
  }

  /// Error of the last fetch, cleared by the next success.
  pub fn error(&self) -> Option<&QueryError> {
    self.error.as_ref()
  }

  /// The rows on screen are not a fresh answer from the backend.
  pub fn is_degraded(&self) -> bool {
    match &self.last {
      Some(result) => result.is_degraded() || self.error.is_some(),
      None => false,
    }
  }

  /// Start a fetch unless one is already running.
  pub fn fetch(&mut self) {
    if self.pending.is_none() {
      self.start();
    }
  }

  /// Abort any running fetch and start over.
  pub fn refetch(&mut self) {
    if let Some(handle) = self.pending.take() {
      handle.abort();
    }
    self.start();
  }

  /// Pick up a finished fetch without waiting. Returns `true` if it did.
  pub fn poll(&mut self) -> bool {
    let joined = match self.pending.as_mut() {
      Some(handle) if handle.is_finished() => handle.now_or_never(),
      _ => None,
    };
    match joined {
      Some(joined) => {
        self.pending = None;
        self.finish(joined);
        true
      }
      None => false,
    }
  }

  /// Wait for the running fetch, if any. Cancel-safe.
  pub async fn settle(&mut self) -> QueryStatus {
    if let Some(handle) = self.pending.as_mut() {
      let joined = handle.await;
      self.pending = None;
      self.finish(joined);
    }
    self.status()
  }

  fn start(&mut self) {
    self.pending = Some(tokio::spawn((self.fetcher)()));
  }

  fn finish(&mut self, joined: Result<Outcome<T>, JoinError>) {
    match joined {
      Ok(Ok(result)) => {
        self.last = Some(result);
        self.error = None;
      }
      Ok(Err(e)) => self.error = Some(e),
      Err(e) => self.error = Some(QueryError::transport(format!("query task failed: {}", e))),
    }
  }
}

impl<T> Drop for Query<T> {
  fn drop(&mut self) {
    if let Some(handle) = self.pending.take() {
      handle.abort();
    }
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("running", &self.pending.is_some())
      .field("last", &self.last)
      .field("error", &self.error)
      .finish_non_exhaustive()
  }
}
