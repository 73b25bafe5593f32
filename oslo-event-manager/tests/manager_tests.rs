//! Manager integration tests against a mock transport.
//!
//! The mock stands in for a live broker: the tests inject raw message bytes
//! directly into the subscription callbacks and observe what reaches the
//! listeners, plus the lifecycle calls the manager makes on the transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use oslo_event_manager::{
    ClusterConfig, EventConfig, ManagerError, MessageTransport, OpenStackEvent,
    OpenStackEventManager, ResourceType, ServiceConfig,
};

mod mock {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use oslo_event_manager::{MessageCallback, MessageTransport, ServiceEndpoint, TransportError};

    /// In-memory transport with a lifecycle journal and a configurable
    /// subscribe failure mode.
    pub struct MockTransport {
        subscriptions: Mutex<HashMap<String, MessageCallback>>,
        journal: Mutex<Vec<String>>,
        running: AtomicBool,
        close_count: AtomicUsize,
        fail_subscribe: AtomicBool,
    }

    impl MockTransport {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                subscriptions: Mutex::new(HashMap::new()),
                journal: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
                close_count: AtomicUsize::new(0),
                fail_subscribe: AtomicBool::new(false),
            })
        }

        /// Deliver raw bytes as if the broker produced them for `service`.
        pub fn inject(&self, service: &str, body: &[u8]) {
            let callback = self
                .subscriptions
                .lock()
                .unwrap()
                .get(service)
                .cloned();
            match callback {
                Some(callback) => callback(service, body),
                None => panic!("no subscription for service {service}"),
            }
        }

        pub fn journal(&self) -> Vec<String> {
            self.journal.lock().unwrap().clone()
        }

        pub fn close_count(&self) -> usize {
            self.close_count.load(Ordering::SeqCst)
        }

        pub fn set_fail_subscribe(&self, fail: bool) {
            self.fail_subscribe.store(fail, Ordering::SeqCst);
        }

        fn record(&self, entry: String) {
            self.journal.lock().unwrap().push(entry);
        }
    }

    #[async_trait]
    impl MessageTransport for MockTransport {
        async fn subscribe(
            &self,
            service: &str,
            _endpoint: ServiceEndpoint,
            callback: MessageCallback,
        ) -> Result<(), TransportError> {
            if self.fail_subscribe.load(Ordering::SeqCst) {
                return Err(TransportError::Subscribe(format!(
                    "mock failure for {service}"
                )));
            }
            let mut subscriptions = self.subscriptions.lock().unwrap();
            if subscriptions.remove(service).is_some() {
                self.record(format!("release:{service}"));
            }
            subscriptions.insert(service.to_string(), callback);
            self.record(format!("subscribe:{service}"));
            Ok(())
        }

        async fn unsubscribe(&self, service: &str) {
            if self.subscriptions.lock().unwrap().remove(service).is_some() {
                self.record(format!("release:{service}"));
            }
        }

        async fn start(&self) -> Result<(), TransportError> {
            self.running.store(true, Ordering::SeqCst);
            self.record("start".to_string());
            Ok(())
        }

        async fn close(&self) {
            self.running.store(false, Ordering::SeqCst);
            self.subscriptions.lock().unwrap().clear();
            self.close_count.fetch_add(1, Ordering::SeqCst);
            self.record("close".to_string());
        }

        fn active_count(&self) -> usize {
            if self.running.load(Ordering::SeqCst) {
                self.subscriptions.lock().unwrap().len()
            } else {
                0
            }
        }

        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }
    }
}

use mock::MockTransport;

/// Manager configured with one cluster `c` and one service `nova`, wired to
/// a mock transport.
async fn manager_with_mock() -> (OpenStackEventManager, Arc<MockTransport>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut cluster = ClusterConfig::default();
    cluster
        .services
        .insert("nova".to_string(), ServiceConfig::default());

    let mut config = EventConfig::default();
    config.clusters.insert("c".to_string(), cluster);

    let manager = OpenStackEventManager::new(config);
    let transport = MockTransport::new();
    manager
        .set_transport("c", Arc::clone(&transport) as Arc<dyn oslo_event_manager::MessageTransport>)
        .await;
    (manager, transport)
}

fn collect_events(manager: &OpenStackEventManager) -> Arc<Mutex<Vec<OpenStackEvent>>> {
    let events: Arc<Mutex<Vec<OpenStackEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    manager.add_listener(Arc::new(move |event: &OpenStackEvent| {
        sink.lock().unwrap().push(event.clone());
    }));
    events
}

const NOVA_CREATE_END: &[u8] = br#"{"oslo.version":"2.0","oslo.message":"{\"event_type\":\"compute.instance.create.end\",\"timestamp\":\"2026-02-06 12:00:00.000000\",\"priority\":\"INFO\",\"payload\":{\"instance_id\":\"vm-1\",\"state\":\"active\",\"old_state\":\"building\"}}"}"#;

#[tokio::test]
async fn enveloped_notification_reaches_listeners() {
    let (manager, transport) = manager_with_mock().await;
    let events = collect_events(&manager);

    manager.start().await;
    assert!(manager.is_running());
    assert!(transport.is_running());

    transport.inject("nova", NOVA_CREATE_END);

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.cluster_id, "c");
    assert_eq!(event.service, "nova");
    assert_eq!(event.resource_type, ResourceType::Server);
    assert_eq!(event.resource_id.as_deref(), Some("vm-1"));
    assert_eq!(event.action.as_deref(), Some("create"));
    assert_eq!(event.phase.as_deref(), Some("end"));
    assert_eq!(event.status.as_deref(), Some("active"));
    assert_eq!(event.old_status.as_deref(), Some("building"));
    assert!(event.terminal);
}

#[tokio::test]
async fn direct_format_notification_reaches_listeners() {
    let (manager, transport) = manager_with_mock().await;
    let events = collect_events(&manager);

    manager.start().await;
    transport.inject(
        "nova",
        br#"{"event_type":"volume.delete.start","payload":{"volume_id":"v-1","status":"deleting"}}"#,
    );

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].resource_type, ResourceType::Volume);
    assert_eq!(events[0].phase.as_deref(), Some("start"));
    assert!(!events[0].terminal);
}

#[tokio::test]
async fn malformed_bytes_are_dropped_and_pipeline_survives() {
    let (manager, transport) = manager_with_mock().await;
    let events = collect_events(&manager);

    manager.start().await;
    transport.inject("nova", b"{{");
    assert!(events.lock().unwrap().is_empty());

    // The consumer is unaffected and keeps delivering.
    assert!(transport.is_running());
    transport.inject("nova", NOVA_CREATE_END);
    assert_eq!(events.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn notification_without_event_type_is_skipped() {
    let (manager, transport) = manager_with_mock().await;
    let events = collect_events(&manager);

    manager.start().await;
    transport.inject("nova", br#"{"payload":{"instance_id":"vm-1"}}"#);
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn panicking_listener_does_not_suppress_others() {
    let (manager, transport) = manager_with_mock().await;

    manager.add_listener(Arc::new(|_: &OpenStackEvent| {
        panic!("bad listener");
    }));
    let reached = Arc::new(AtomicUsize::new(0));
    let reached_in_listener = Arc::clone(&reached);
    manager.add_listener(Arc::new(move |_: &OpenStackEvent| {
        reached_in_listener.fetch_add(1, Ordering::SeqCst);
    }));

    manager.start().await;
    transport.inject("nova", NOVA_CREATE_END);

    assert_eq!(reached.load(Ordering::SeqCst), 1);
    assert!(transport.is_running());
}

#[tokio::test]
async fn dynamic_service_management_adjusts_consumer_count() {
    let (manager, transport) = manager_with_mock().await;
    manager.start().await;
    assert_eq!(manager.active_consumer_count(), 1);

    manager
        .add_service("c", "cinder", ServiceConfig::default())
        .await
        .unwrap();
    assert_eq!(manager.active_consumer_count(), 2);
    assert!(manager.config().clusters["c"].services.contains_key("cinder"));

    manager.remove_service("c", "cinder").await;
    assert_eq!(manager.active_consumer_count(), 1);
    assert!(!manager.config().clusters["c"].services.contains_key("cinder"));
    assert!(transport.is_running());
}

#[tokio::test]
async fn add_service_requires_existing_transport() {
    let (manager, _transport) = manager_with_mock().await;
    manager.start().await;

    let err = manager
        .add_service("nowhere", "cinder", ServiceConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::ClusterNotFound(_)));
}

#[tokio::test]
async fn resubscribing_releases_previous_session_first() {
    let (manager, transport) = manager_with_mock().await;
    manager.start().await;

    manager
        .add_service("c", "nova", ServiceConfig::default())
        .await
        .unwrap();

    let journal = transport.journal();
    let release = journal.iter().position(|e| e == "release:nova");
    let resubscribe = journal.iter().rposition(|e| e == "subscribe:nova");
    assert!(
        release.is_some() && release < resubscribe,
        "expected release before re-subscribe, journal: {journal:?}"
    );
    // Still exactly one consumer for the service.
    assert_eq!(manager.active_consumer_count(), 1);
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let (manager, transport) = manager_with_mock().await;
    manager.start().await;

    manager.close().await;
    assert!(!manager.is_running());
    assert_eq!(manager.active_consumer_count(), 0);
    assert_eq!(transport.close_count(), 1);

    manager.close().await;
    assert_eq!(transport.close_count(), 1);
}

#[tokio::test]
async fn double_start_is_a_noop() {
    let (manager, transport) = manager_with_mock().await;
    manager.start().await;
    manager.start().await;

    let starts = transport.journal().iter().filter(|e| *e == "start").count();
    assert_eq!(starts, 1);
}

#[tokio::test]
async fn disabled_configuration_short_circuits_start() {
    let mut config = EventConfig::default();
    config.enabled = false;
    config.clusters.insert("c".to_string(), ClusterConfig::default());

    let manager = OpenStackEventManager::new(config);
    let transport = MockTransport::new();
    manager
        .set_transport("c", Arc::clone(&transport) as Arc<dyn oslo_event_manager::MessageTransport>)
        .await;

    manager.start().await;
    assert!(!manager.is_running());
    assert!(transport.journal().is_empty());
}

#[tokio::test]
async fn subscribe_failure_does_not_abort_cluster_start() {
    let (manager, transport) = manager_with_mock().await;
    transport.set_fail_subscribe(true);

    manager.start().await;

    // The subscription failed but the transport was still started.
    assert!(transport.is_running());
    assert_eq!(manager.active_consumer_count(), 0);
}

#[tokio::test]
async fn set_transport_closes_displaced_transport() {
    let (manager, first) = manager_with_mock().await;
    let second = MockTransport::new();

    manager
        .set_transport("c", Arc::clone(&second) as Arc<dyn oslo_event_manager::MessageTransport>)
        .await;

    assert_eq!(first.close_count(), 1);
    assert_eq!(second.close_count(), 0);
}

#[cfg(not(feature = "kafka"))]
#[tokio::test]
async fn kafka_cluster_without_kafka_support_is_skipped() {
    let mut cluster = ClusterConfig::default();
    cluster.transport = oslo_event_manager::TransportKind::Kafka;
    cluster
        .services
        .insert("nova".to_string(), ServiceConfig::default());

    let mut config = EventConfig::default();
    config.clusters.insert("c".to_string(), cluster);

    // The cluster fails with a clear missing-dependency error, is logged,
    // and the manager still comes up.
    let manager = OpenStackEventManager::new(config);
    manager.start().await;
    assert!(manager.is_running());
    assert_eq!(manager.active_consumer_count(), 0);

    manager.close().await;
}
