//! Scripted backend for unit tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::backend::{LifecycleEvent, QueryDescriptor, RemoteBackend};
use crate::error::QueryError;

pub struct FakeBackend {
  responses: Mutex<VecDeque<Result<Value, QueryError>>>,
  queries: Mutex<Vec<QueryDescriptor>>,
  healthy: AtomicBool,
  hanging: AtomicBool,
  probes: AtomicUsize,
  events: broadcast::Sender<LifecycleEvent>,
}

impl FakeBackend {
  pub fn new() -> Self {
    let (events, _) = broadcast::channel(16);
    Self {
      responses: Mutex::new(VecDeque::new()),
      queries: Mutex::new(Vec::new()),
      healthy: AtomicBool::new(true),
      hanging: AtomicBool::new(false),
      probes: AtomicUsize::new(0),
      events,
    }
  }

  /// Queue the outcome of the next query. An empty queue answers `[]`.
  pub fn push_response(&self, response: Result<Value, QueryError>) {
    self.responses.lock().unwrap().push_back(response);
  }

  pub fn set_healthy(&self, healthy: bool) {
    self.healthy.store(healthy, Ordering::SeqCst);
  }

  /// Make health checks never answer.
  pub fn set_hanging(&self, hanging: bool) {
    self.hanging.store(hanging, Ordering::SeqCst);
  }

  pub fn emit(&self, event: LifecycleEvent) {
    let _ = self.events.send(event);
  }

  pub fn queries(&self) -> Vec<QueryDescriptor> {
    self.queries.lock().unwrap().clone()
  }

  pub fn probe_count(&self) -> usize {
    self.probes.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl RemoteBackend for FakeBackend {
  async fn query(&self, descriptor: &QueryDescriptor) -> Result<Value, QueryError> {
    self.queries.lock().unwrap().push(descriptor.clone());
    let next = self.responses.lock().unwrap().pop_front();
    next.unwrap_or_else(|| Ok(json!([])))
  }

  async fn health_probe(&self) -> bool {
    self.probes.fetch_add(1, Ordering::SeqCst);
    if self.hanging.load(Ordering::SeqCst) {
      std::future::pending::<()>().await;
    }
    self.healthy.load(Ordering::SeqCst)
  }

  fn lifecycle_events(&self) -> broadcast::Receiver<LifecycleEvent> {
    self.events.subscribe()
  }
}
