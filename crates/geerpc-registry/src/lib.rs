//! GeeRPC Registry
//!
//! An HTTP endpoint holding the set of live server addresses, with
//! TTL-based eviction driven by heartbeats:
//!
//! - `GET` answers with the alive addresses, comma-joined, in the
//!   `X-Geerpc-Servers` response header (evicting anything stale first).
//! - `POST` upserts the address in the `X-Geerpc-Server` request header,
//!   refreshing its last-seen time. A missing or empty header is a 500.
//! - Any other verb is a 405.
//!
//! Servers keep themselves registered with [`heartbeat`].
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use geerpc_registry::Registry;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(Registry::default());
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:9091").await?;
//!     axum::serve(listener, registry.router()).await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tracing::{debug, warn};

use geerpc_common::{Result, DEFAULT_REGISTRY_PATH, SERVERS_HEADER, SERVER_HEADER};

/// How long a server stays alive without a heartbeat.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// How often [`heartbeat`] beats when given a zero period.
pub const DEFAULT_HEARTBEAT_PERIOD: Duration = Duration::from_secs(60);

/// The membership map: server address to last heartbeat time.
pub struct Registry {
    ttl: Duration,
    servers: Mutex<HashMap<String, Instant>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl Registry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            servers: Mutex::new(HashMap::new()),
        }
    }

    /// Adds a server or refreshes its last-seen time.
    pub fn put_server(&self, addr: &str) {
        let mut servers = self.servers.lock().unwrap();
        servers.insert(addr.to_string(), Instant::now());
    }

    /// The alive addresses, sorted. Entries past the TTL are removed
    /// before the list is produced.
    pub fn alive_servers(&self) -> Vec<String> {
        let mut servers = self.servers.lock().unwrap();
        servers.retain(|_, last_seen| last_seen.elapsed() < self.ttl);
        let mut alive: Vec<String> = servers.keys().cloned().collect();
        alive.sort();
        alive
    }

    /// The registry mounted at the default path.
    pub fn router(self: &Arc<Self>) -> Router {
        self.router_at(DEFAULT_REGISTRY_PATH)
    }

    /// The registry mounted at a caller-chosen path.
    pub fn router_at(self: &Arc<Self>, path: &str) -> Router {
        Router::new()
            .route(path, get(get_servers).post(post_server))
            .with_state(self.clone())
    }
}

async fn get_servers(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let alive = registry.alive_servers().join(",");
    [(SERVERS_HEADER, alive)]
}

async fn post_server(State(registry): State<Arc<Registry>>, headers: HeaderMap) -> StatusCode {
    let addr = headers
        .get(SERVER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|addr| !addr.is_empty());
    match addr {
        Some(addr) => {
            debug!(%addr, "heartbeat received");
            registry.put_server(addr);
            StatusCode::OK
        }
        None => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Keeps `addr` registered: one immediate POST to `registry`, then one per
/// period until the first failure, after which the task stops beating.
///
/// A zero period falls back to [`DEFAULT_HEARTBEAT_PERIOD`]. The caller
/// should pick a period comfortably below the registry's TTL.
pub fn heartbeat(
    registry: impl Into<String>,
    addr: impl Into<String>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    let registry = registry.into();
    let addr = addr.into();
    let period = if period.is_zero() {
        DEFAULT_HEARTBEAT_PERIOD
    } else {
        period
    };

    tokio::spawn(async move {
        let http = reqwest::Client::new();
        let mut ticker = tokio::time::interval(period);
        loop {
            // The first tick completes immediately, giving the initial beat.
            ticker.tick().await;
            if let Err(err) = send_heartbeat(&http, &registry, &addr).await {
                warn!("heartbeat to {} failed, stopping: {}", registry, err);
                return;
            }
        }
    })
}

async fn send_heartbeat(http: &reqwest::Client, registry: &str, addr: &str) -> Result<()> {
    debug!("{} sends heartbeat to registry {}", addr, registry);
    http.post(registry)
        .header(SERVER_HEADER, addr)
        .send()
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_server_refreshes_last_seen() {
        let registry = Registry::new(Duration::from_secs(60));
        registry.put_server("127.0.0.1:9001");
        registry.put_server("127.0.0.1:9001");
        assert_eq!(registry.alive_servers(), vec!["127.0.0.1:9001".to_string()]);
    }

    #[test]
    fn test_alive_servers_sorted() {
        let registry = Registry::new(Duration::from_secs(60));
        registry.put_server("b:1");
        registry.put_server("a:1");
        assert_eq!(
            registry.alive_servers(),
            vec!["a:1".to_string(), "b:1".to_string()]
        );
    }

    #[test]
    fn test_stale_servers_evicted_on_read() {
        let registry = Registry::new(Duration::from_millis(10));
        registry.put_server("short-lived:1");
        std::thread::sleep(Duration::from_millis(30));
        assert!(registry.alive_servers().is_empty());
    }
}
