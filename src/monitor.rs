//! Best-effort view of backend reachability.
//!
//! The monitor never gates requests. It exists so the UI can show an offline
//! banner and so logs record when the backend came and went.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::backend::{LifecycleEvent, RemoteBackend};
use crate::config::MonitorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
  Unknown,
  Connected,
  Disconnected,
  Reconnecting,
}

/// Input to the status state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
  ProbeOk,
  ProbeFailed,
  Event(LifecycleEvent),
}

impl ConnectionStatus {
  /// Next status after `signal`. Pairs not listed leave the status unchanged.
  pub fn apply(self, signal: Signal) -> Self {
    use ConnectionStatus::*;
    use LifecycleEvent::{Connect, Disconnect, Reconnect};

    match (self, signal) {
      (Unknown, Signal::ProbeOk | Signal::Event(Connect)) => Connected,
      (Unknown, Signal::ProbeFailed | Signal::Event(Disconnect)) => Disconnected,
      (Connected, Signal::ProbeFailed | Signal::Event(Disconnect)) => Disconnected,
      (Disconnected, Signal::Event(Reconnect)) => Reconnecting,
      (Disconnected, Signal::ProbeOk | Signal::Event(Connect)) => Connected,
      (Reconnecting, Signal::ProbeOk | Signal::Event(Connect)) => Connected,
      (Reconnecting, Signal::ProbeFailed | Signal::Event(Disconnect)) => Disconnected,
      (status, _) => status,
    }
  }
}

impl std::fmt::Display for ConnectionStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let label = match self {
      Self::Unknown => "unknown",
      Self::Connected => "connected",
      Self::Disconnected => "disconnected",
      Self::Reconnecting => "reconnecting",
    };
    f.write_str(label)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionState {
  pub status: ConnectionStatus,
  /// When the last health probe finished
  pub last_checked: Option<DateTime<Utc>>,
  /// Round trip of the last health probe
  pub last_latency: Option<Duration>,
}

impl Default for ConnectionState {
  fn default() -> Self {
    Self {
      status: ConnectionStatus::Unknown,
      last_checked: None,
      last_latency: None,
    }
  }
}

#[derive(Debug, Clone)]
pub struct MonitorOptions {
  pub probe_interval: Duration,
}

impl Default for MonitorOptions {
  fn default() -> Self {
    Self {
      probe_interval: Duration::from_secs(60),
    }
  }
}

impl From<&MonitorConfig> for MonitorOptions {
  fn from(config: &MonitorConfig) -> Self {
    Self {
      probe_interval: Duration::from_secs(config.probe_interval_secs),
    }
  }
}

struct Running {
  shutdown: oneshot::Sender<()>,
  task: JoinHandle<()>,
}

/// Tracks [`ConnectionState`] from a startup probe, periodic probes and
/// backend lifecycle events.
///
/// Nothing happens until [`start`](Self::start); the owner must call
/// [`stop`](Self::stop) on teardown. Dropping the monitor also ends the task.
pub struct ConnectionMonitor {
  backend: Arc<dyn RemoteBackend>,
  options: MonitorOptions,
  state: Arc<watch::Sender<ConnectionState>>,
  running: Mutex<Option<Running>>,
}

impl ConnectionMonitor {
  pub fn new(backend: Arc<dyn RemoteBackend>, options: MonitorOptions) -> Self {
    let (state, _) = watch::channel(ConnectionState::default());
    Self {
      backend,
      options,
      state: Arc::new(state),
      running: Mutex::new(None),
    }
  }

  /// Snapshot of the current state.
  pub fn state(&self) -> ConnectionState {
    self.state.borrow().clone()
  }

  /// Receiver notified on every state change.
  pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
    self.state.subscribe()
  }

  pub fn is_running(&self) -> bool {
    self.lock_running().is_some()
  }

  /// Spawn the monitoring task. Fails if already running.
  pub fn start(&self) -> Result<()> {
    let mut running = self.lock_running();
    if running.is_some() {
      return Err(eyre!("Connection monitor already running"));
    }

    // Subscribe before the startup probe so no event is missed
    let events = self.backend.lifecycle_events();
    let (shutdown, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(run(
      Arc::clone(&self.backend),
      Arc::clone(&self.state),
      self.options.probe_interval,
      events,
      shutdown_rx,
    ));

    info!(
      interval_secs = self.options.probe_interval.as_secs(),
      "Connection monitor started"
    );
    *running = Some(Running { shutdown, task });
    Ok(())
  }

  /// Cancel the periodic probe and the event subscription. Later calls are no-ops.
  pub async fn stop(&self) {
    let Some(running) = self.lock_running().take() else {
      return;
    };

    let _ = running.shutdown.send(());
    if let Err(e) = running.task.await {
      warn!(error = %e, "Connection monitor task ended abnormally");
    }
    info!("Connection monitor stopped");
  }

  /// Probe the backend now and report whether it answered.
  pub async fn check_connection(&self) -> bool {
    probe(self.backend.as_ref(), &self.state).await
  }

  fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
    self.running.lock().unwrap_or_else(|p| p.into_inner())
  }
}

async fn run(
  backend: Arc<dyn RemoteBackend>,
  state: Arc<watch::Sender<ConnectionState>>,
  interval: Duration,
  mut events: tokio::sync::broadcast::Receiver<LifecycleEvent>,
  mut shutdown: oneshot::Receiver<()>,
) {
  // A probe may hang as long as the transport lets it, so shutdown wins over it
  tokio::select! {
    _ = &mut shutdown => return,
    _ = probe(backend.as_ref(), &state) => {}
  }

  let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
  let mut events_open = true;

  loop {
    tokio::select! {
      // Also fires when the monitor is dropped without stop()
      _ = &mut shutdown => break,
      _ = ticker.tick() => {
        tokio::select! {
          _ = &mut shutdown => break,
          _ = probe(backend.as_ref(), &state) => {}
        }
      }
      event = events.recv(), if events_open => match event {
        Ok(event) => apply(&state, Signal::Event(event), None),
        Err(RecvError::Lagged(skipped)) => {
          warn!(skipped, "Missed backend lifecycle events");
        }
        Err(RecvError::Closed) => {
          debug!("Backend lifecycle channel closed, relying on probes");
          events_open = false;
        }
      },
    }
  }
}

async fn probe(backend: &dyn RemoteBackend, state: &watch::Sender<ConnectionState>) -> bool {
  let started = Instant::now();
  let ok = backend.health_probe().await;
  let latency = started.elapsed();

  debug!(ok, latency_ms = latency.as_millis() as u64, "Health probe finished");
  let signal = if ok { Signal::ProbeOk } else { Signal::ProbeFailed };
  apply(state, signal, Some((Utc::now(), latency)));
  ok
}

fn apply(
  state: &watch::Sender<ConnectionState>,
  signal: Signal,
  probed: Option<(DateTime<Utc>, Duration)>,
) {
  state.send_if_modified(|current| {
    let previous = current.status;
    current.status = previous.apply(signal);

    if current.status != previous {
      info!(from = %previous, to = %current.status, ?signal, "Connection status changed");
    }

    match probed {
      Some((at, latency)) => {
        current.last_checked = Some(at);
        current.last_latency = Some(latency);
        true
      }
      None => current.status != previous,
    }
  });
}
