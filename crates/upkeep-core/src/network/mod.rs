//! Device connectivity tracking.
//!
//! The platform bridge pushes every connectivity change into
//! [`NetworkObserver::handle_change`]; the observer de-duplicates by value,
//! notifies listeners, and wakes anyone blocked in `wait_for_connection`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::client::HealthEndpoint;
use crate::config::ClientConfig;
use crate::listeners::{ListenerSet, Subscription};
use crate::transport::HttpTransport;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    pub is_connected: bool,
    pub is_internet_reachable: bool,
    #[serde(rename = "type")]
    pub connection_type: String,
}

impl NetworkStatus {
    pub fn new(
        is_connected: bool,
        is_internet_reachable: bool,
        connection_type: impl Into<String>,
    ) -> Self {
        Self {
            is_connected,
            is_internet_reachable,
            connection_type: connection_type.into(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(false, false, "unknown")
    }

    pub fn is_online(&self) -> bool {
        self.is_connected && self.is_internet_reachable
    }
}

/// Platform hook that reports the device's current connectivity.
#[async_trait]
pub trait ConnectivitySource: Send + Sync {
    async fn check(&self) -> NetworkStatus;
}

/// Connectivity source for hosts without a platform reachability API:
/// the device counts as online while the backend health endpoint answers.
pub struct HealthCheckSource {
    transport: Arc<dyn HttpTransport>,
    health: HealthEndpoint,
}

impl HealthCheckSource {
    pub fn new(transport: Arc<dyn HttpTransport>, config: &ClientConfig) -> Self {
        Self {
            transport,
            health: HealthEndpoint::new(config),
        }
    }
}

#[async_trait]
impl ConnectivitySource for HealthCheckSource {
    async fn check(&self) -> NetworkStatus {
        match self.health.check(self.transport.as_ref()).await {
            Some(_) => NetworkStatus::new(true, true, "other"),
            None => NetworkStatus::new(false, false, "none"),
        }
    }
}

pub struct NetworkObserver {
    source: Arc<dyn ConnectivitySource>,
    transport: Arc<dyn HttpTransport>,
    health: HealthEndpoint,
    status: watch::Sender<NetworkStatus>,
    listeners: ListenerSet<NetworkStatus>,
}

impl NetworkObserver {
    /// Create the observer, seeding its status from an immediate check.
    pub async fn init(
        source: Arc<dyn ConnectivitySource>,
        transport: Arc<dyn HttpTransport>,
        config: &ClientConfig,
    ) -> Self {
        let initial = source.check().await;
        info!(
            online = initial.is_online(),
            kind = %initial.connection_type,
            "Network observer started"
        );
        let (status, _) = watch::channel(initial);
        Self {
            source,
            transport,
            health: HealthEndpoint::new(config),
            status,
            listeners: ListenerSet::new(),
        }
    }

    pub fn get_status(&self) -> NetworkStatus {
        self.status.borrow().clone()
    }

    pub fn is_online(&self) -> bool {
        self.status.borrow().is_online()
    }

    pub fn is_offline(&self) -> bool {
        !self.is_online()
    }

    /// Register a callback for every value-distinct status change.
    pub fn add_listener<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&NetworkStatus) + Send + Sync + 'static,
    {
        self.listeners.add(callback)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Tasks currently blocked in `wait_for_connection`.
    pub fn waiter_count(&self) -> usize {
        self.status.receiver_count()
    }

    /// Record a new status. Identical statuses are ignored.
    pub fn handle_change(&self, status: NetworkStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status.clone();
                true
            }
        });
        if !changed {
            return;
        }
        info!(
            online = status.is_online(),
            kind = %status.connection_type,
            "Network status changed"
        );
        self.listeners.emit(&status);
    }

    /// Re-check the platform and apply the result.
    pub async fn refresh(&self) -> NetworkStatus {
        let status = self.source.check().await;
        self.handle_change(status.clone());
        status
    }

    /// Resolve once the device is online, or `false` after `timeout`.
    pub async fn wait_for_connection(&self, timeout: Duration) -> bool {
        if self.is_online() {
            return true;
        }
        // The receiver is dropped with this future on every path.
        let mut rx = self.status.subscribe();
        let outcome = tokio::time::timeout(timeout, rx.wait_for(NetworkStatus::is_online))
            .await
            .map(|changed| changed.is_ok());
        match outcome {
            Ok(online) => online,
            Err(_) => {
                debug!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for connection"
                );
                false
            }
        }
    }

    /// Ping the backend health endpoint. Any response counts as reachable.
    pub async fn test_connectivity(&self) -> bool {
        self.health.check(self.transport.as_ref()).await.is_some()
    }

    pub fn destroy(&self) {
        self.listeners.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::client::HEALTH_ENDPOINT;
    use crate::testing::{ScriptedTransport, StaticConnectivity};
    use crate::transport::HttpResponse;

    fn wifi() -> NetworkStatus {
        NetworkStatus::new(true, true, "wifi")
    }

    fn offline() -> NetworkStatus {
        NetworkStatus::new(false, false, "none")
    }

    async fn observer_with(
        initial: NetworkStatus,
        transport: Arc<ScriptedTransport>,
    ) -> NetworkObserver {
        NetworkObserver::init(
            Arc::new(StaticConnectivity::new(initial)),
            transport,
            &ClientConfig::default(),
        )
        .await
    }

    #[tokio::test]
    async fn test_initial_check_sets_status() {
        let observer = observer_with(wifi(), Arc::new(ScriptedTransport::new())).await;
        assert_eq!(observer.get_status(), wifi());
        assert!(observer.is_online());
        assert!(!observer.is_offline());
    }

    #[test]
    fn test_online_requires_reachability() {
        assert!(!NetworkStatus::new(true, false, "cellular").is_online());
        assert!(!NetworkStatus::unknown().is_online());
    }

    #[test]
    fn test_status_serializes_with_platform_names() {
        let json = serde_json::to_value(wifi()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"isConnected": true, "isInternetReachable": true, "type": "wifi"})
        );
    }

    #[tokio::test]
    async fn test_identical_status_does_not_renotify() {
        let observer = observer_with(offline(), Arc::new(ScriptedTransport::new())).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _subscription =
            observer.add_listener(move |status| sink.lock().unwrap().push(status.clone()));

        observer.handle_change(offline());
        observer.handle_change(wifi());
        observer.handle_change(wifi());
        observer.handle_change(NetworkStatus::new(true, true, "cellular"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], wifi());
        assert_eq!(seen[1].connection_type, "cellular");
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_stop_delivery() {
        let observer = observer_with(offline(), Arc::new(ScriptedTransport::new())).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let _bad = observer.add_listener(|_| panic!("listener bug"));
        let counter = calls.clone();
        let _good = observer.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        observer.handle_change(wifi());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_and_destroy() {
        let observer = observer_with(offline(), Arc::new(ScriptedTransport::new())).await;
        let subscription = observer.add_listener(|_| {});
        let _other = observer.add_listener(|_| {});
        subscription.unsubscribe();
        assert_eq!(observer.listener_count(), 1);

        observer.destroy();
        assert_eq!(observer.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_connection_when_already_online() {
        let observer = observer_with(wifi(), Arc::new(ScriptedTransport::new())).await;
        assert!(observer.wait_for_connection(Duration::from_millis(1)).await);
        assert_eq!(observer.waiter_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_connection_resolves_on_transition() {
        let observer = Arc::new(observer_with(offline(), Arc::new(ScriptedTransport::new())).await);

        let waiter = {
            let observer = observer.clone();
            tokio::spawn(async move {
                observer
                    .wait_for_connection(Duration::from_millis(5000))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(observer.waiter_count(), 1);

        // Still offline: not a wake-up
        observer.handle_change(NetworkStatus::new(true, false, "wifi"));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(!waiter.is_finished());

        observer.handle_change(wifi());
        assert!(waiter.await.unwrap());
        assert_eq!(observer.waiter_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_connection_times_out() {
        let observer = observer_with(offline(), Arc::new(ScriptedTransport::new())).await;
        let started = tokio::time::Instant::now();
        assert!(!observer.wait_for_connection(Duration::from_millis(5000)).await);
        assert!(started.elapsed() >= Duration::from_millis(5000));
        assert_eq!(observer.waiter_count(), 0);
        assert_eq!(observer.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_refresh_applies_check() {
        let source = Arc::new(StaticConnectivity::new(offline()));
        let observer = NetworkObserver::init(
            source.clone(),
            Arc::new(ScriptedTransport::new()),
            &ClientConfig::default(),
        )
        .await;
        source.set(wifi());
        assert_eq!(observer.refresh().await, wifi());
        assert!(observer.is_online());
    }

    #[tokio::test]
    async fn test_connectivity_check_hits_health_endpoint() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(HttpResponse::new(503, "down"));
        let observer = observer_with(wifi(), transport.clone()).await;

        assert!(observer.test_connectivity().await);
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].url.ends_with(HEALTH_ENDPOINT));
        assert!(requests[0].header("authorization").is_none());
    }

    #[tokio::test]
    async fn test_health_source_maps_answers_to_status() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(HttpResponse::new(500, "oops"));
        transport.push_transport_error("connection refused");
        let source = HealthCheckSource::new(transport.clone(), &ClientConfig::default());

        assert!(source.check().await.is_online());
        assert_eq!(source.check().await, offline());
        assert!(transport.requests()[0].url.ends_with(HEALTH_ENDPOINT));
    }

    #[tokio::test]
    async fn test_connectivity_check_failure_is_false() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_transport_error("connection refused");
        let observer = observer_with(wifi(), transport).await;
        assert!(!observer.test_connectivity().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connectivity_check_timeout_is_false() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_delayed(Duration::from_secs(60), HttpResponse::new(200, ""));
        let observer = observer_with(wifi(), transport).await;
        assert!(!observer.test_connectivity().await);
    }
}
