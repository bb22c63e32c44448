//! Boundary to the hosted data backend.

pub mod descriptor;
mod rest;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::QueryError;

pub use descriptor::{Direction, FilterOp, FilterValue, Page, QueryDescriptor, QueryKind};
pub use rest::RestBackend;

/// Connection lifecycle notifications from the backend's realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
  Connect,
  Disconnect,
  Reconnect,
}

/// Remote data backend.
///
/// The retry and cache layers treat `query` as a black box and never look
/// inside the descriptor.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
  /// Run a query. `Select` yields a JSON array of rows, `Count` a JSON number.
  async fn query(&self, descriptor: &QueryDescriptor) -> Result<Value, QueryError>;

  /// Cheap, side-effect-free reachability check.
  async fn health_probe(&self) -> bool;

  /// Subscribe to connection lifecycle events.
  fn lifecycle_events(&self) -> broadcast::Receiver<LifecycleEvent>;
}
