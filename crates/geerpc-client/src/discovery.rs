//! Server discovery.
//!
//! A [`Discovery`] resolves a logical service to concrete server addresses
//! under a selection policy. [`MultiServersDiscovery`] works over a fixed
//! list supplied by the caller; [`RegistryDiscovery`] keeps the list fresh
//! from a registry endpoint.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::debug;

use geerpc_common::{Result, RpcError, SERVERS_HEADER};

/// How [`Discovery::get`] picks one server from the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    /// Pick uniformly at random.
    Random,
    /// Rotate through the list.
    RoundRobin,
}

/// Resolves server addresses for the multi-server client.
pub trait Discovery: Send + Sync {
    /// Refreshes the list from its backing source, if any.
    fn refresh(&self) -> impl Future<Output = Result<()>> + Send;

    /// Replaces the list.
    fn update(&self, servers: Vec<String>) -> impl Future<Output = Result<()>> + Send;

    /// Picks one server under the given mode.
    fn get(&self, mode: SelectMode) -> impl Future<Output = Result<String>> + Send;

    /// Returns the full list.
    fn get_all(&self) -> impl Future<Output = Result<Vec<String>>> + Send;
}

struct ServerList {
    servers: Vec<String>,
    index: usize,
}

/// Discovery over a caller-maintained server list.
pub struct MultiServersDiscovery {
    inner: Mutex<ServerList>,
}

impl MultiServersDiscovery {
    pub fn new(servers: Vec<String>) -> Self {
        // Start the rotation at a random point so a fleet of clients does
        // not converge on the same first server.
        let index = rand::thread_rng().gen_range(0..u32::MAX as usize);
        Self {
            inner: Mutex::new(ServerList { servers, index }),
        }
    }

    fn set(&self, servers: Vec<String>) {
        self.inner.lock().unwrap().servers = servers;
    }

    fn pick(&self, mode: SelectMode) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        let len = inner.servers.len();
        if len == 0 {
            return Err(RpcError::NoAvailableServers);
        }
        match mode {
            SelectMode::Random => {
                let choice = rand::thread_rng().gen_range(0..len);
                Ok(inner.servers[choice].clone())
            }
            SelectMode::RoundRobin => {
                inner.index = (inner.index + 1) % len;
                Ok(inner.servers[inner.index].clone())
            }
        }
    }

    fn all(&self) -> Vec<String> {
        self.inner.lock().unwrap().servers.clone()
    }
}

impl Discovery for MultiServersDiscovery {
    async fn refresh(&self) -> Result<()> {
        // Nothing to refresh from.
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) -> Result<()> {
        self.set(servers);
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String> {
        self.pick(mode)
    }

    async fn get_all(&self) -> Result<Vec<String>> {
        Ok(self.all())
    }
}

/// How long a fetched server list stays fresh by default.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Discovery backed by a registry endpoint.
///
/// `refresh` is lazy: the registry is only consulted when the cached list
/// is older than the refresh interval. `get`/`get_all` refresh first.
pub struct RegistryDiscovery {
    servers: MultiServersDiscovery,
    registry: String,
    refresh_interval: Duration,
    last_update: Mutex<Option<Instant>>,
    http: reqwest::Client,
}

impl RegistryDiscovery {
    /// Creates a discovery against the registry's full URL, e.g.
    /// `"http://127.0.0.1:9091/_geerpc_/registry"`.
    pub fn new(registry: impl Into<String>) -> Self {
        Self {
            servers: MultiServersDiscovery::new(Vec::new()),
            registry: registry.into(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            last_update: Mutex::new(None),
            http: reqwest::Client::new(),
        }
    }

    /// Sets how long a fetched list stays fresh.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    fn is_fresh(&self) -> bool {
        self.last_update
            .lock()
            .unwrap()
            .is_some_and(|at| at.elapsed() < self.refresh_interval)
    }

    fn mark_updated(&self) {
        *self.last_update.lock().unwrap() = Some(Instant::now());
    }
}

impl Discovery for RegistryDiscovery {
    async fn refresh(&self) -> Result<()> {
        if self.is_fresh() {
            return Ok(());
        }
        debug!("refreshing server list from registry {}", self.registry);
        let response = self.http.get(&self.registry).send().await?;
        let servers: Vec<String> = response
            .headers()
            .get(SERVERS_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|server| !server.is_empty())
            .map(String::from)
            .collect();
        self.servers.set(servers);
        self.mark_updated();
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) -> Result<()> {
        self.servers.set(servers);
        self.mark_updated();
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String> {
        self.refresh().await?;
        self.servers.pick(mode)
    }

    async fn get_all(&self) -> Result<Vec<String>> {
        self.refresh().await?;
        Ok(self.servers.all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_robin_rotates_through_all_servers() {
        let servers = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let discovery = MultiServersDiscovery::new(servers.clone());

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(discovery.get(SelectMode::RoundRobin).await.unwrap());
        }
        seen.sort();
        assert_eq!(seen, servers, "one full rotation visits every server once");

        // The rotation wraps.
        let fourth = discovery.get(SelectMode::RoundRobin).await.unwrap();
        assert!(servers.contains(&fourth));
    }

    #[tokio::test]
    async fn test_random_select_stays_in_list() {
        let servers = vec!["a".to_string(), "b".to_string()];
        let discovery = MultiServersDiscovery::new(servers.clone());
        for _ in 0..20 {
            let picked = discovery.get(SelectMode::Random).await.unwrap();
            assert!(servers.contains(&picked));
        }
    }

    #[tokio::test]
    async fn test_empty_list_yields_no_available_servers() {
        let discovery = MultiServersDiscovery::new(Vec::new());
        for mode in [SelectMode::Random, SelectMode::RoundRobin] {
            let err = discovery.get(mode).await.unwrap_err();
            assert!(matches!(err, RpcError::NoAvailableServers));
        }
    }

    #[tokio::test]
    async fn test_update_replaces_the_list() {
        let discovery = MultiServersDiscovery::new(vec!["old".to_string()]);
        discovery.update(vec!["new".to_string()]).await.unwrap();
        assert_eq!(discovery.get_all().await.unwrap(), vec!["new".to_string()]);
    }

    #[tokio::test]
    async fn test_registry_discovery_update_marks_fresh() {
        // With a fresh manual update, get_all must not consult the
        // (nonexistent) registry.
        let discovery = RegistryDiscovery::new("http://127.0.0.1:1/_geerpc_/registry");
        discovery.update(vec!["srv".to_string()]).await.unwrap();
        assert_eq!(discovery.get_all().await.unwrap(), vec!["srv".to_string()]);
    }
}
