//! Client abstraction driven by node discovery, and its HTTP implementation

use async_trait::async_trait;
use parking_lot::RwLock;
use searchbox_core::ClientConfig;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::action::{Action, ActionResult};
use crate::error::{Error, Result};
use crate::server_set::ServerSet;

/// What node discovery needs from a client.
///
/// Implementations must make `set_servers` atomic for concurrent readers.
#[async_trait]
pub trait ClusterClient: Send + Sync + 'static {
    /// Execute `action` against one of the current servers.
    ///
    /// `Err` means the request never produced a response.
    async fn execute(&self, action: &dyn Action) -> Result<ActionResult>;

    /// Replace the active server list
    fn set_servers(&self, servers: ServerSet);
}

/// `reqwest` backed client rotating through its server list
pub struct HttpClient {
    http: reqwest::Client,
    servers: RwLock<Arc<Vec<String>>>,
    next_index: AtomicUsize,
}

impl HttpClient {
    /// Create a client from configuration.
    ///
    /// Fails if the bootstrap list is empty or holds an invalid URL.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        if config.servers.is_empty() {
            return Err(Error::Configuration(
                "at least one server is required".to_string(),
            ));
        }

        let mut servers = Vec::with_capacity(config.servers.len());
        for server in &config.servers {
            let url = url::Url::parse(server).map_err(|e| {
                Error::Configuration(format!("invalid server URL '{server}': {e}"))
            })?;
            if url.host_str().is_none() {
                return Err(Error::Configuration(format!(
                    "server URL '{server}' has no host"
                )));
            }
            servers.push(server.trim_end_matches('/').to_string());
        }

        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.read_timeout())
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            servers: RwLock::new(Arc::new(servers)),
            next_index: AtomicUsize::new(0),
        })
    }

    /// Snapshot of the current server list
    #[must_use]
    pub fn servers(&self) -> Arc<Vec<String>> {
        self.servers.read().clone()
    }

    fn next_server(&self) -> Option<String> {
        let servers = self.servers();
        if servers.is_empty() {
            return None;
        }
        let index = self.next_index.fetch_add(1, Ordering::Relaxed) % servers.len();
        Some(servers[index].clone())
    }
}

#[async_trait]
impl ClusterClient for HttpClient {
    async fn execute(&self, action: &dyn Action) -> Result<ActionResult> {
        let server = self
            .next_server()
            .ok_or_else(|| Error::Transport("no servers available".to_string()))?;
        let url = format!("{server}/{}", action.uri());

        tracing::trace!(action = action.name(), url = %url, "Executing action");

        let response = self
            .http
            .request(action.method(), &url)
            .send()
            .await
            .map_err(|e| {
                Error::Transport(format!("{} request to {url} failed: {e}", action.name()))
            })?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| {
            Error::Transport(format!("failed reading {} response from {url}: {e}", action.name()))
        })?;

        Ok(ActionResult::from_response(status, &body))
    }

    fn set_servers(&self, servers: ServerSet) {
        // An empty list would leave the client with nothing to talk to
        if servers.is_empty() {
            tracing::warn!("Discovery returned no servers, keeping current server list");
            return;
        }

        let servers = servers.into_vec();
        let mut current = self.servers.write();
        if **current == servers {
            tracing::trace!(server_count = servers.len(), "Server list unchanged");
            return;
        }

        tracing::info!(
            server_count = servers.len(),
            servers = ?servers,
            "Server list updated"
        );
        *current = Arc::new(servers);
    }
}
