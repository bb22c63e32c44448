//! PostgREST-style HTTP backend.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Response};
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use url::Url;

use super::descriptor::{Direction, FilterOp, FilterValue, Page, QueryDescriptor, QueryKind};
use super::{LifecycleEvent, RemoteBackend};
use crate::config::Config;
use crate::error::QueryError;

/// Transport health as last observed by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
  Unknown,
  Up,
  Down,
}

/// Lifecycle events implied by a request outcome.
fn transport_transition(prev: Transport, reachable: bool) -> (Transport, &'static [LifecycleEvent]) {
  match (prev, reachable) {
    (Transport::Unknown, true) => (Transport::Up, &[LifecycleEvent::Connect]),
    (Transport::Unknown, false) => (Transport::Down, &[LifecycleEvent::Disconnect]),
    (Transport::Up, false) => (Transport::Down, &[LifecycleEvent::Disconnect]),
    (Transport::Down, true) => (
      Transport::Up,
      &[LifecycleEvent::Reconnect, LifecycleEvent::Connect],
    ),
    (state, _) => (state, &[]),
  }
}

/// Backend speaking the PostgREST dialect over HTTPS.
///
/// There is no websocket here; lifecycle events are derived from whether
/// requests reach the server at all.
pub struct RestBackend {
  client: Client,
  /// `<url>/rest/v1/`
  base: Url,
  probe: QueryDescriptor,
  events: broadcast::Sender<LifecycleEvent>,
  transport: Mutex<Transport>,
}

impl RestBackend {
  /// Build a backend, reading the API key from the configured environment variable.
  pub fn new(config: &Config) -> Result<Self> {
    Self::with_api_key(config, &config.get_api_key()?)
  }

  pub fn with_api_key(config: &Config, api_key: &str) -> Result<Self> {
    let mut headers = HeaderMap::new();
    let key_header =
      HeaderValue::from_str(api_key).map_err(|e| eyre!("Invalid API key header: {}", e))?;
    let auth_header = HeaderValue::from_str(&format!("Bearer {}", api_key))
      .map_err(|e| eyre!("Invalid API key header: {}", e))?;
    headers.insert("apikey", key_header);
    headers.insert(AUTHORIZATION, auth_header);

    let client = Client::builder()
      .default_headers(headers)
      .timeout(Duration::from_secs(config.backend.request_timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    let base = rest_base(&config.backend.url)?;

    let probe = QueryDescriptor::select(config.monitor.probe_table.as_str())
      .columns(&["id"])
      .page(Page { from: 0, to: 0 })
      .build()
      .map_err(|e| eyre!("Invalid probe table: {}", e))?;

    let (events, _) = broadcast::channel(16);

    Ok(Self {
      client,
      base,
      probe,
      events,
      transport: Mutex::new(Transport::Unknown),
    })
  }

  fn record_transport(&self, reachable: bool) {
    let mut transport = self.transport.lock().unwrap_or_else(|p| p.into_inner());
    let (next, emitted) = transport_transition(*transport, reachable);
    *transport = next;
    drop(transport);

    for event in emitted {
      debug!(?event, "Transport lifecycle event");
      // No subscribers is fine
      let _ = self.events.send(*event);
    }
  }

  async fn send(&self, descriptor: &QueryDescriptor) -> Result<Response, QueryError> {
    let mut url = self
      .base
      .join(&descriptor.table)
      .map_err(|e| QueryError::transport(format!("invalid table url: {}", e)))?;
    url
      .query_pairs_mut()
      .extend_pairs(query_params(descriptor));

    let method = match descriptor.kind {
      QueryKind::Select => Method::GET,
      QueryKind::Count => Method::HEAD,
    };
    let mut request = self.client.request(method, url);

    if descriptor.kind == QueryKind::Count {
      request = request.header("Prefer", "count=exact");
    }
    if let Some(page) = descriptor.page {
      request = request
        .header("Range-Unit", "items")
        .header("Range", format!("{}-{}", page.from, page.to));
    }

    match request.send().await {
      Ok(response) => {
        self.record_transport(true);
        Ok(response)
      }
      Err(e) => {
        self.record_transport(false);
        Err(QueryError::from(e))
      }
    }
  }
}

#[async_trait]
impl RemoteBackend for RestBackend {
  async fn query(&self, descriptor: &QueryDescriptor) -> Result<Value, QueryError> {
    let response = self.send(descriptor).await?;
    let status = response.status();

    if !status.is_success() {
      let message = response.text().await.unwrap_or_default();
      return Err(QueryError::status(status.as_u16(), message));
    }

    match descriptor.kind {
      QueryKind::Select => Ok(response.json::<Value>().await?),
      QueryKind::Count => {
        let total = response
          .headers()
          .get("content-range")
          .and_then(|v| v.to_str().ok())
          .and_then(content_range_total)
          .ok_or_else(|| QueryError::Decode("missing row count in Content-Range".into()))?;
        Ok(Value::from(total))
      }
    }
  }

  async fn health_probe(&self) -> bool {
    match self.query(&self.probe).await {
      Ok(_) => true,
      Err(e) => {
        warn!(table = %self.probe.table, error = %e, "Health probe failed");
        false
      }
    }
  }

  fn lifecycle_events(&self) -> broadcast::Receiver<LifecycleEvent> {
    self.events.subscribe()
  }
}

fn rest_base(url: &str) -> Result<Url> {
  let mut base = Url::parse(url).map_err(|e| eyre!("Invalid backend url {}: {}", url, e))?;
  if !base.path().ends_with('/') {
    let path = format!("{}/", base.path());
    base.set_path(&path);
  }
  base
    .join("rest/v1/")
    .map_err(|e| eyre!("Invalid backend url {}: {}", url, e))
}

/// Translate a descriptor into PostgREST query parameters.
fn query_params(descriptor: &QueryDescriptor) -> Vec<(String, String)> {
  let mut params = Vec::new();

  let select = if descriptor.columns.is_empty() {
    "*".to_string()
  } else {
    descriptor.columns.join(",")
  };
  params.push(("select".to_string(), select));

  for filter in &descriptor.filters {
    let value = match (&filter.op, &filter.value) {
      (FilterOp::In, FilterValue::List(values)) => {
        let quoted: Vec<String> = values.iter().map(|v| quote_list_item(v)).collect();
        format!("({})", quoted.join(","))
      }
      (_, value) => scalar(value),
    };
    params.push((filter.field.clone(), format!("{}.{}", filter.op.as_str(), value)));
  }

  if !descriptor.order.is_empty() {
    let order: Vec<String> = descriptor
      .order
      .iter()
      .map(|o| {
        let dir = match o.direction {
          Direction::Asc => "asc",
          Direction::Desc => "desc",
        };
        format!("{}.{}", o.field, dir)
      })
      .collect();
    params.push(("order".to_string(), order.join(",")));
  }

  params
}

fn scalar(value: &FilterValue) -> String {
  match value {
    FilterValue::Null => "null".to_string(),
    FilterValue::Bool(b) => b.to_string(),
    FilterValue::Int(i) => i.to_string(),
    FilterValue::Text(s) => s.clone(),
    FilterValue::List(items) => items.join(","),
  }
}

fn quote_list_item(item: &str) -> String {
  let escaped = item.replace('\\', "\\\\").replace('"', "\\\"");
  format!("\"{}\"", escaped)
}

/// Total from `Content-Range: 0-24/573` or `*/573`.
fn content_range_total(header: &str) -> Option<u64> {
  header.rsplit_once('/')?.1.trim().parse().ok()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::sync::Arc;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;

  /// What the stub server does with one connection.
  enum Reply {
    Http(String),
    HangUp,
  }

  fn http(status: &str, headers: &[(&str, &str)], body: &str) -> Reply {
    let mut out = format!(
      "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n",
      status,
      body.len()
    );
    for (name, value) in headers {
      out.push_str(&format!("{}: {}\r\n", name, value));
    }
    out.push_str("\r\n");
    out.push_str(body);
    Reply::Http(out)
  }

  /// Serve one reply per connection, recording each request head.
  async fn stub_server(replies: Vec<Reply>) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let heads = Arc::new(Mutex::new(Vec::new()));
    let recorded = heads.clone();

    tokio::spawn(async move {
      for reply in replies {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
          let n = socket.read(&mut buf).await.unwrap();
          if n == 0 {
            break;
          }
          head.extend_from_slice(&buf[..n]);
        }
        recorded
          .lock()
          .unwrap()
          .push(String::from_utf8_lossy(&head).to_lowercase());

        if let Reply::Http(response) = reply {
          socket.write_all(response.as_bytes()).await.unwrap();
          socket.shutdown().await.unwrap();
        }
      }
    });

    (url, heads)
  }

  fn backend(url: &str) -> RestBackend {
    let config = Config::from_yaml(&format!("backend:\n  url: {}\n", url)).unwrap();
    RestBackend::with_api_key(&config, "test-key").unwrap()
  }

  fn regions_page() -> QueryDescriptor {
    QueryDescriptor::select("regions")
      .page(Page { from: 0, to: 19 })
      .build()
      .unwrap()
  }

  #[tokio::test]
  async fn test_select_returns_rows() {
    let (url, heads) = stub_server(vec![http(
      "200 OK",
      &[("Content-Type", "application/json")],
      r#"[{"id":"r1","name":"Bakı"}]"#,
    )])
    .await;
    let backend = backend(&url);

    let rows = backend.query(&regions_page()).await.unwrap();

    assert_eq!(rows, json!([{"id": "r1", "name": "Bakı"}]));
    let head = heads.lock().unwrap()[0].clone();
    assert!(head.starts_with("get /rest/v1/regions?select=*"), "{}", head);
    assert!(head.contains("range: 0-19"));
    assert!(head.contains("apikey: test-key"));
    assert!(head.contains("authorization: bearer test-key"));
  }

  #[tokio::test]
  async fn test_count_reads_content_range() {
    let (url, heads) = stub_server(vec![http(
      "206 Partial Content",
      &[("Content-Range", "0-0/42")],
      "",
    )])
    .await;
    let backend = backend(&url);
    let descriptor = QueryDescriptor::count("schools")
      .eq("sector_id", "s1")
      .build()
      .unwrap();

    let total = backend.query(&descriptor).await.unwrap();

    assert_eq!(total, json!(42));
    let head = heads.lock().unwrap()[0].clone();
    assert!(head.starts_with("head /rest/v1/schools?"), "{}", head);
    assert!(head.contains("prefer: count=exact"));
  }

  #[tokio::test]
  async fn test_count_without_content_range_is_decode_error() {
    let (url, _) = stub_server(vec![http("200 OK", &[], "")]).await;
    let backend = backend(&url);
    let descriptor = QueryDescriptor::count("schools").build().unwrap();

    let err = backend.query(&descriptor).await.unwrap_err();

    assert!(matches!(err, QueryError::Decode(_)));
  }

  #[tokio::test]
  async fn test_error_status_keeps_body() {
    let (url, _) = stub_server(vec![http("503 Service Unavailable", &[], "maintenance")]).await;
    let backend = backend(&url);
    let mut events = backend.lifecycle_events();

    let err = backend.query(&regions_page()).await.unwrap_err();

    match &err {
      QueryError::Status { status, message } => {
        assert_eq!(*status, 503);
        assert_eq!(message, "maintenance");
      }
      other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.is_retryable());
    // The server answered, so the transport counts as up
    assert_eq!(events.try_recv().unwrap(), LifecycleEvent::Connect);
  }

  #[tokio::test]
  async fn test_unreachable_backend_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let backend = backend(&url);
    let mut events = backend.lifecycle_events();

    let err = backend.query(&regions_page()).await.unwrap_err();

    assert!(matches!(err, QueryError::Transport(_)), "{:?}", err);
    assert!(err.is_retryable());
    assert_eq!(events.try_recv().unwrap(), LifecycleEvent::Disconnect);
    assert!(!backend.health_probe().await);
    assert!(events.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_lifecycle_events_follow_request_outcomes() {
    let ok = || http("200 OK", &[("Content-Type", "application/json")], "[]");
    let (url, _) = stub_server(vec![ok(), Reply::HangUp, ok(), ok()]).await;
    let backend = backend(&url);
    let mut events = backend.lifecycle_events();

    assert!(backend.health_probe().await);
    assert_eq!(events.try_recv().unwrap(), LifecycleEvent::Connect);

    let err = backend.query(&regions_page()).await.unwrap_err();
    assert!(matches!(err, QueryError::Transport(_)), "{:?}", err);
    assert_eq!(events.try_recv().unwrap(), LifecycleEvent::Disconnect);

    backend.query(&regions_page()).await.unwrap();
    assert_eq!(events.try_recv().unwrap(), LifecycleEvent::Reconnect);
    assert_eq!(events.try_recv().unwrap(), LifecycleEvent::Connect);

    backend.query(&regions_page()).await.unwrap();
    assert!(events.try_recv().is_err());
  }

  #[test]
  fn test_query_params() {
    let d = QueryDescriptor::select("schools")
      .columns(&["id", "name"])
      .eq("sector_id", "s-1")
      .filter("archived", FilterOp::Is, false)
      .one_of("type", &["primary", "a,b"])
      .order("name", Direction::Asc)
      .order("created_at", Direction::Desc)
      .build()
      .unwrap();

    let params = query_params(&d);
    let get = |k: &str| params.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());

    assert_eq!(get("select"), Some("id,name"));
    assert_eq!(get("sector_id"), Some("eq.s-1"));
    assert_eq!(get("archived"), Some("is.false"));
    assert_eq!(get("type"), Some("in.(\"primary\",\"a,b\")"));
    assert_eq!(get("order"), Some("name.asc,created_at.desc"));
  }

  #[test]
  fn test_select_all_by_default() {
    let d = QueryDescriptor::select("regions").build().unwrap();
    assert_eq!(query_params(&d), vec![("select".to_string(), "*".to_string())]);
  }

  #[test]
  fn test_rest_base() {
    assert_eq!(
      rest_base("https://abc.example.co").unwrap().as_str(),
      "https://abc.example.co/rest/v1/"
    );
    assert_eq!(
      rest_base("https://host.test/proxy").unwrap().as_str(),
      "https://host.test/proxy/rest/v1/"
    );
    assert!(rest_base("not a url").is_err());
  }

  #[test]
  fn test_content_range_total() {
    assert_eq!(content_range_total("0-24/573"), Some(573));
    assert_eq!(content_range_total("*/0"), Some(0));
    assert_eq!(content_range_total("0-24/*"), None);
  }

  #[test]
  fn test_transport_transitions() {
    let (s, e) = transport_transition(Transport::Unknown, true);
    assert_eq!((s, e), (Transport::Up, &[LifecycleEvent::Connect][..]));

    let (s, e) = transport_transition(Transport::Up, true);
    assert_eq!(s, Transport::Up);
    assert!(e.is_empty());

    let (s, e) = transport_transition(Transport::Up, false);
    assert_eq!((s, e), (Transport::Down, &[LifecycleEvent::Disconnect][..]));

    let (s, e) = transport_transition(Transport::Down, false);
    assert_eq!(s, Transport::Down);
    assert!(e.is_empty());

    let (s, e) = transport_transition(Transport::Down, true);
    assert_eq!(s, Transport::Up);
    assert_eq!(e, &[LifecycleEvent::Reconnect, LifecycleEvent::Connect][..]);
  }
}
