//! Periodic node discovery
//!
//! A `NodeChecker` asks the cluster for its nodes, turns each advertised
//! HTTP address into a URL and hands the resulting set to the client,
//! replacing its server list.

use futures::FutureExt;
use parking_lot::Mutex;
use searchbox_core::DiscoveryConfig;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::address::parse_node_address;
use super::nodes_info::NodesInfo;
use crate::action::NodesInfoAction;
use crate::client::ClusterClient;
use crate::error::{Error, Result};
use crate::server_set::ServerSet;

/// Lifecycle of the background discovery loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckerState {
    Created,
    Running,
    Stopped,
}

/// Result of one discovery cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A new server set with this many URLs was published
    Published(usize),
    /// The request failed; the client's servers were left alone
    Aborted,
    /// Another cycle of this checker was already running
    Skipped,
}

struct Lifecycle {
    state: CheckerState,
    handle: Option<JoinHandle<()>>,
}

/// Resets the in-flight flag, even if the cycle panics
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Keeps a client's server list in sync with the cluster's nodes
pub struct NodeChecker<C: ClusterClient> {
    client: Arc<C>,
    action: NodesInfoAction,
    scheme: String,
    enabled: bool,
    interval: Duration,
    in_flight: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
    cancel_token: CancellationToken,
}

impl<C: ClusterClient> NodeChecker<C> {
    /// Create a checker for `client`. Nothing runs until `start`.
    ///
    /// Fails on an invalid discovery configuration (zero frequency, bad scheme).
    pub fn new(client: Arc<C>, config: &DiscoveryConfig) -> Result<Self> {
        config.validate()?;
        let interval = config.interval()?;

        Ok(Self {
            client,
            action: NodesInfoAction::with_filter(config.filter.clone()),
            scheme: config.default_scheme.clone(),
            enabled: config.enabled,
            interval,
            in_flight: AtomicBool::new(false),
            lifecycle: Mutex::new(Lifecycle {
                state: CheckerState::Created,
                handle: None,
            }),
            cancel_token: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn state(&self) -> CheckerState {
        self.lifecycle.lock().state
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the discovery loop on the current tokio runtime.
    ///
    /// The first cycle runs immediately, then one cycle per interval
    /// measured from the end of the previous one. Does nothing when
    /// discovery is disabled or the loop is already running. A stopped
    /// checker cannot be restarted.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.state {
            CheckerState::Running => return Ok(()),
            CheckerState::Stopped => {
                return Err(Error::Lifecycle(
                    "node checker was stopped and cannot be restarted".to_string(),
                ));
            }
            CheckerState::Created => {}
        }

        if !self.enabled {
            tracing::debug!("Node discovery disabled, not starting");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            Error::Lifecycle(format!("node checker must be started inside a tokio runtime: {e}"))
        })?;
        let handle = runtime.spawn(Self::run_loop(
            Arc::downgrade(self),
            self.cancel_token.clone(),
            self.interval,
        ));
        lifecycle.handle = Some(handle);
        lifecycle.state = CheckerState::Running;

        tracing::info!(interval = ?self.interval, "Node discovery started");
        Ok(())
    }

    /// Stop scheduling cycles. A cycle already running is not interrupted.
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == CheckerState::Running {
            tracing::info!("Node discovery stopping");
        }
        lifecycle.state = CheckerState::Stopped;
        self.cancel_token.cancel();
    }

    /// Stop and wait for the loop to exit, letting an in-flight cycle finish.
    pub async fn shutdown(&self) {
        self.stop();

        let handle = self.lifecycle.lock().handle.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Node discovery loop ended abnormally");
            }
        }
    }

    async fn run_loop(checker: Weak<Self>, cancel_token: CancellationToken, interval: Duration) {
        loop {
            if cancel_token.is_cancelled() {
                break;
            }
            // The loop must not keep a dropped checker alive
            let Some(this) = checker.upgrade() else {
                break;
            };

            if let Err(panic) = AssertUnwindSafe(this.run_one_iteration())
                .catch_unwind()
                .await
            {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(panic = %message, "Node discovery cycle panicked");
            }
            drop(this);

            tokio::select! {
                () = cancel_token.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }

        tracing::info!("Node discovery loop shutting down");
    }

    /// Run one discovery cycle.
    ///
    /// Request failures and malformed responses are absorbed: the former
    /// leave the client untouched, the latter publish what could be parsed.
    pub async fn run_one_iteration(&self) -> CycleOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Node discovery cycle already in flight, skipping");
            return CycleOutcome::Skipped;
        }
        let _guard = InFlightGuard(&self.in_flight);

        let result = match self.client.execute(&self.action).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Node discovery request failed, keeping current servers"
                );
                return CycleOutcome::Aborted;
            }
        };

        if !result.succeeded() {
            tracing::warn!(
                response_code = result.response_code(),
                error = result.error_message().unwrap_or("unknown error"),
                "Node discovery request was rejected, keeping current servers"
            );
            return CycleOutcome::Aborted;
        }

        let servers = self.collect_servers(result.json());
        let count = servers.len();
        tracing::debug!(server_count = count, servers = %servers, "Discovered cluster nodes");

        self.client.set_servers(servers);
        CycleOutcome::Published(count)
    }

    fn collect_servers(&self, json: &Value) -> ServerSet {
        let entries = match NodesInfo::decode(json) {
            Ok(nodes_info) => nodes_info.into_entries(),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Unexpected nodes info response, treating as no nodes"
                );
                Vec::new()
            }
        };

        let mut servers = ServerSet::new();
        for entry in entries {
            let Some(address) = entry.http_address.as_deref() else {
                tracing::trace!(node = %entry.name, "Node has no http address, skipping");
                continue;
            };

            match parse_node_address(address, &self.scheme) {
                Some(url) => {
                    servers.insert(url);
                }
                None => {
                    tracing::debug!(
                        node = %entry.name,
                        address,
                        "Unparseable node address, skipping"
                    );
                }
            }
        }

        servers
    }
}

impl<C: ClusterClient> Drop for NodeChecker<C> {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionResult};
    use async_trait::async_trait;
    use searchbox_core::TimeUnit;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    type Responder = Box<dyn Fn(usize) -> Result<ActionResult> + Send + Sync>;

    struct FakeClient {
        respond: Responder,
        calls: AtomicUsize,
        uris: Mutex<Vec<String>>,
        published: Mutex<Vec<ServerSet>>,
        /// (entered, release) pair to hold `execute` open
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl FakeClient {
        fn new(
            respond: impl Fn(usize) -> Result<ActionResult> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                respond: Box::new(respond),
                calls: AtomicUsize::new(0),
                uris: Mutex::new(Vec::new()),
                published: Mutex::new(Vec::new()),
                gate: None,
            })
        }

        fn returning(json: Value) -> Arc<Self> {
            Self::new(move |_| Ok(ActionResult::success(json.clone())))
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn published(&self) -> Vec<ServerSet> {
            self.published.lock().clone()
        }

        fn last_published(&self) -> Vec<String> {
            self.published
                .lock()
                .last()
                .cloned()
                .expect("nothing published")
                .into_vec()
        }
    }

    #[async_trait]
    impl ClusterClient for FakeClient {
        async fn execute(&self, action: &dyn Action) -> Result<ActionResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.uris.lock().push(action.uri());
            if let Some((entered, release)) = &self.gate {
                entered.notify_one();
                release.notified().await;
            }
            (self.respond)(call)
        }

        fn set_servers(&self, servers: ServerSet) {
            self.published.lock().push(servers);
        }
    }

    fn single_node(address: &str) -> Value {
        json!({
            "ok": "true",
            "nodes": {
                "node_name": {"http_address": address}
            }
        })
    }

    fn discovery() -> DiscoveryConfig {
        DiscoveryConfig::default()
            .enabled(true)
            .with_frequency(1, TimeUnit::Seconds)
    }

    fn checker(client: &Arc<FakeClient>, config: &DiscoveryConfig) -> Arc<NodeChecker<FakeClient>> {
        Arc::new(NodeChecker::new(Arc::clone(client), config).unwrap())
    }

    #[tokio::test]
    async fn test_resolved_without_hostname_address() {
        let client = FakeClient::returning(single_node("inet[/192.168.2.7:9200]"));
        let checker = checker(&client, &discovery());

        assert_eq!(checker.run_one_iteration().await, CycleOutcome::Published(1));

        assert_eq!(client.calls(), 1);
        assert_eq!(client.published().len(), 1);
        assert_eq!(client.last_published(), vec!["http://192.168.2.7:9200"]);
    }

    #[tokio::test]
    async fn test_resolved_without_hostname_address_with_custom_scheme() {
        let client = FakeClient::returning(single_node("inet[/192.168.2.7:9200]"));
        let checker = checker(&client, &discovery().with_default_scheme("https"));

        checker.run_one_iteration().await;

        assert_eq!(client.last_published(), vec!["https://192.168.2.7:9200"]);
    }

    #[tokio::test]
    async fn test_resolved_with_hostname_address() {
        let client = FakeClient::returning(single_node("inet[searchly.com/192.168.2.7:9200]"));
        let checker = checker(&client, &discovery());

        checker.run_one_iteration().await;

        assert_eq!(client.last_published(), vec!["http://192.168.2.7:9200"]);
    }

    #[tokio::test]
    async fn test_unresolved_address() {
        let client = FakeClient::returning(single_node("inet[192.168.2.7:9200]"));
        let checker = checker(&client, &discovery());

        checker.run_one_iteration().await;

        assert_eq!(client.last_published(), vec!["http://192.168.2.7:9200"]);
    }

    #[tokio::test]
    async fn test_invalid_unresolved_address() {
        let client = FakeClient::returning(single_node("inet[192.168.2.7:]"));
        let checker = checker(&client, &discovery());

        assert_eq!(checker.run_one_iteration().await, CycleOutcome::Published(0));

        assert_eq!(client.published().len(), 1);
        assert!(client.last_published().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_resolved_address() {
        let client = FakeClient::returning(single_node("inet[gg/192.168.2.7:]"));
        let checker = checker(&client, &discovery());

        checker.run_one_iteration().await;

        assert_eq!(client.published().len(), 1);
        assert!(client.last_published().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_does_not_publish() {
        let client = FakeClient::new(|_| Err(Error::Transport("connection refused".to_string())));
        let checker = checker(&client, &discovery());

        assert_eq!(checker.run_one_iteration().await, CycleOutcome::Aborted);

        assert_eq!(client.calls(), 1);
        assert!(client.published().is_empty());
    }

    #[tokio::test]
    async fn test_unsuccessful_result_does_not_publish() {
        let client = FakeClient::new(|_| Ok(ActionResult::failure(503, "cluster unavailable")));
        let checker = checker(&client, &discovery());

        assert_eq!(checker.run_one_iteration().await, CycleOutcome::Aborted);
        assert!(client.published().is_empty());
    }

    #[tokio::test]
    async fn test_mixed_entries_keep_order_and_dedup() {
        let client = FakeClient::returning(json!({
            "nodes": {
                "n1": {"http_address": "inet[/10.0.0.3:9200]"},
                "n2": {"http_address": "inet[10.0.0.3:]"},
                "n3": {"http_address": "inet[es-1/10.0.0.1:9200]"},
                "n4": {"transport_address": "inet[/10.0.0.9:9300]"},
                "n5": {"http_address": 42},
                "n6": {"http_address": "inet[/10.0.0.3:9200]"},
                "n7": {"http_address": "10.0.0.5:9200"},
                "n8": {"http_address": "inet[10.0.0.2:9201]"}
            }
        }));
        let checker = checker(&client, &discovery());

        assert_eq!(checker.run_one_iteration().await, CycleOutcome::Published(3));

        assert_eq!(
            client.last_published(),
            vec![
                "http://10.0.0.3:9200",
                "http://10.0.0.1:9200",
                "http://10.0.0.2:9201",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_nodes_publishes_empty_set() {
        let client = FakeClient::returning(json!({"ok": "true"}));
        let checker = checker(&client, &discovery());

        assert_eq!(checker.run_one_iteration().await, CycleOutcome::Published(0));
        assert_eq!(client.published(), vec![ServerSet::new()]);
    }

    #[tokio::test]
    async fn test_malformed_nodes_publishes_empty_set() {
        let client = FakeClient::returning(json!({"nodes": "not-a-map"}));
        let checker = checker(&client, &discovery());

        assert_eq!(checker.run_one_iteration().await, CycleOutcome::Published(0));
        assert_eq!(client.published(), vec![ServerSet::new()]);
    }

    #[tokio::test]
    async fn test_repeated_cycles_replace_rather_than_accumulate() {
        let client = FakeClient::returning(json!({
            "nodes": {
                "a": {"http_address": "inet[/10.0.0.1:9200]"},
                "b": {"http_address": "inet[/10.0.0.2:9200]"}
            }
        }));
        let checker = checker(&client, &discovery());

        checker.run_one_iteration().await;
        checker.run_one_iteration().await;

        let published = client.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0], published[1]);
        assert_eq!(published[1].len(), 2);
    }

    #[tokio::test]
    async fn test_request_uses_filter() {
        let client = FakeClient::returning(json!({}));
        let checker = checker(&client, &discovery().with_filter("_local"));

        checker.run_one_iteration().await;

        assert_eq!(*client.uris.lock(), vec!["_nodes/_local/http"]);
    }

    #[test]
    fn test_new_rejects_zero_frequency() {
        let client = FakeClient::returning(json!({}));
        let config = discovery().with_frequency(0, TimeUnit::Seconds);

        let result = NodeChecker::new(client, &config);
        assert!(matches!(result, Err(Error::Core(_))));
    }

    #[test]
    fn test_new_rejects_empty_scheme() {
        let client = FakeClient::returning(json!({}));
        let config = discovery().with_default_scheme("");

        assert!(NodeChecker::new(client, &config).is_err());
    }

    #[tokio::test]
    async fn test_overlapping_iteration_is_skipped() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let json = single_node("inet[/10.0.0.1:9200]");
        let client = Arc::new(FakeClient {
            respond: Box::new(move |_| Ok(ActionResult::success(json.clone()))),
            calls: AtomicUsize::new(0),
            uris: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            gate: Some((Arc::clone(&entered), Arc::clone(&release))),
        });
        let checker = checker(&client, &discovery());

        let first = {
            let checker = Arc::clone(&checker);
            tokio::spawn(async move { checker.run_one_iteration().await })
        };
        entered.notified().await;

        assert_eq!(checker.run_one_iteration().await, CycleOutcome::Skipped);

        release.notify_one();
        assert_eq!(first.await.unwrap(), CycleOutcome::Published(1));
        assert_eq!(client.calls(), 1);
        assert_eq!(client.published().len(), 1);
    }

    #[tokio::test]
    async fn test_start_when_disabled_is_noop() {
        let client = FakeClient::returning(json!({}));
        let checker = checker(&client, &discovery().enabled(false));

        checker.start().unwrap();

        assert_eq!(checker.state(), CheckerState::Created);
        tokio::task::yield_now().await;
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_runs_at_fixed_delay() {
        let client = FakeClient::returning(single_node("inet[/10.0.0.1:9200]"));
        let checker = checker(&client, &discovery());

        checker.start().unwrap();
        checker.start().unwrap();
        assert_eq!(checker.state(), CheckerState::Running);

        // Cycles at 0s, 1s and 2s
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(client.calls(), 3);
        assert_eq!(client.published().len(), 3);

        checker.shutdown().await;
        assert_eq!(checker.state(), CheckerState::Stopped);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_failures() {
        let client = FakeClient::new(|call| match call {
            0 => Err(Error::Transport("connection refused".to_string())),
            1 => panic!("broken response"),
            _ => Ok(ActionResult::success(single_node("inet[/10.0.0.1:9200]"))),
        });
        let checker = checker(&client, &discovery());

        checker.start().unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert_eq!(client.calls(), 3);
        assert_eq!(client.published().len(), 1);
        assert_eq!(client.last_published(), vec!["http://10.0.0.1:9200"]);

        // The panicking cycle released the in-flight flag
        assert_eq!(checker.run_one_iteration().await, CycleOutcome::Published(1));

        checker.stop();
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let client = FakeClient::returning(json!({}));
        let checker = checker(&client, &discovery());

        assert!(matches!(checker.start(), Err(Error::Lifecycle(_))));
        assert_eq!(checker.state(), CheckerState::Created);
    }

    #[tokio::test]
    async fn test_stop_lets_in_flight_cycle_finish() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let json = single_node("inet[/10.0.0.1:9200]");
        let client = Arc::new(FakeClient {
            respond: Box::new(move |_| Ok(ActionResult::success(json.clone()))),
            calls: AtomicUsize::new(0),
            uris: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            gate: Some((Arc::clone(&entered), Arc::clone(&release))),
        });
        let checker = checker(&client, &discovery());

        checker.start().unwrap();
        entered.notified().await;

        checker.stop();
        assert_eq!(checker.state(), CheckerState::Stopped);

        release.notify_one();
        checker.shutdown().await;

        assert_eq!(client.calls(), 1);
        assert_eq!(client.published().len(), 1);
        assert_eq!(client.last_published(), vec!["http://10.0.0.1:9200"]);
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let client = FakeClient::returning(json!({}));
        let checker = checker(&client, &discovery());

        checker.stop();
        checker.stop();
        assert_eq!(checker.state(), CheckerState::Stopped);

        assert!(matches!(checker.start(), Err(Error::Lifecycle(_))));
        assert_eq!(client.calls(), 0);

        // Direct cycles still work in any state
        assert_eq!(checker.run_one_iteration().await, CycleOutcome::Published(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_checker_ends_loop() {
        let client = FakeClient::returning(json!({}));
        let checker = checker(&client, &discovery());

        checker.start().unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(client.calls(), 1);

        drop(checker);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(client.calls(), 1);
    }
}
