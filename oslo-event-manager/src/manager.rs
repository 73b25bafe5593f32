//! Manager lifecycle and the message-processing pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use oslo_parser::{EnvelopeUnwrapper, NotificationParser};
use oslo_transport::{MessageCallback, MessageTransport, RabbitMqTransport};

#[cfg(feature = "kafka")]
use oslo_transport::KafkaTransport;
#[cfg(not(feature = "kafka"))]
use oslo_transport::TransportError;

use crate::config::{ClusterConfig, EventConfig, ServiceConfig, TransportKind};
use crate::error::ManagerError;
use crate::listener::{EventListener, ListenerSet};

/// Main entry point for consuming OpenStack oslo.messaging notifications.
///
/// Owns a transport per cluster, unwraps and parses every delivered message,
/// and dispatches parsed events to registered [`EventListener`]s. All
/// methods are safe to call concurrently; `start` and `stop` are serialised
/// against each other.
pub struct OpenStackEventManager {
    config: std::sync::Mutex<EventConfig>,
    /// cluster id -> transport
    transports: DashMap<String, Arc<dyn MessageTransport>>,
    pipeline: Arc<EventPipeline>,
    running: AtomicBool,
    /// Makes start/stop (and dynamic mutation) mutually exclusive
    lifecycle: tokio::sync::Mutex<()>,
}

impl OpenStackEventManager {
    pub fn new(config: EventConfig) -> Self {
        Self {
            config: std::sync::Mutex::new(config),
            transports: DashMap::new(),
            pipeline: Arc::new(EventPipeline::default()),
            running: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Build a manager from a YAML configuration file.
    pub fn from_yaml_file(path: impl AsRef<std::path::Path>) -> Result<Self, crate::ConfigError> {
        Ok(Self::new(EventConfig::from_yaml_file(path)?))
    }

    // ---- Listener management ----

    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        self.pipeline.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn EventListener>) {
        self.pipeline.listeners.remove(listener);
    }

    // ---- Transport management ----

    /// Install a transport for a cluster, e.g. a third-party backend.
    ///
    /// Call before [`start`](Self::start) to have the cluster's configured
    /// services subscribed onto it; an already-installed transport for the
    /// same cluster is closed first.
    pub async fn set_transport(
        &self,
        cluster_id: impl Into<String>,
        transport: Arc<dyn MessageTransport>,
    ) {
        let _guard = self.lifecycle.lock().await;
        if let Some(previous) = self.transports.insert(cluster_id.into(), transport) {
            previous.close().await;
        }
    }

    // ---- Lifecycle ----

    /// Start consumers for every configured cluster.
    ///
    /// A cluster or service that fails to start is logged and skipped; the
    /// remaining clusters still come up.
    pub async fn start(&self) {
        let _guard = self.lifecycle.lock().await;

        if self.running.load(Ordering::SeqCst) {
            tracing::warn!("event manager is already running");
            return;
        }
        let config = self.config.lock().expect("config lock poisoned").clone();
        if !config.enabled {
            tracing::info!("openstack event consumption is disabled by configuration");
            return;
        }

        tracing::info!("starting openstack notification consumers");

        for (cluster_id, cluster) in &config.clusters {
            if let Err(e) = self.start_cluster(cluster_id, cluster, &config).await {
                tracing::error!(cluster = %cluster_id, error = %e, "failed to start cluster");
            }
        }

        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            clusters = self.transports.len(),
            "openstack notification consumers started"
        );
    }

    /// Stop all consumers and release broker resources. Idempotent.
    pub async fn stop(&self) {
        let _guard = self.lifecycle.lock().await;

        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let transports: Vec<Arc<dyn MessageTransport>> = self
            .transports
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for transport in transports {
            transport.close().await;
        }
        self.transports.clear();

        tracing::info!("all openstack notification consumers stopped");
    }

    /// Alias for [`stop`](Self::stop).
    pub async fn close(&self) {
        self.stop().await;
    }

    // ---- Dynamic service management ----

    /// Add and start a service consumer at runtime. The cluster's transport
    /// must already exist (configured and started, or installed via
    /// [`set_transport`](Self::set_transport)).
    pub async fn add_service(
        &self,
        cluster_id: &str,
        service: &str,
        svc: ServiceConfig,
    ) -> Result<(), ManagerError> {
        let _guard = self.lifecycle.lock().await;

        let transport = self
            .transports
            .get(cluster_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ManagerError::ClusterNotFound(cluster_id.to_string()))?;

        transport
            .subscribe(service, svc.endpoint(), self.callback_for(cluster_id))
            .await?;

        let mut config = self.config.lock().expect("config lock poisoned");
        if let Some(cluster) = config.clusters.get_mut(cluster_id) {
            cluster.services.insert(service.to_string(), svc);
        }

        tracing::info!(cluster = %cluster_id, service, "dynamically added service");
        Ok(())
    }

    /// Stop and remove a service consumer at runtime.
    pub async fn remove_service(&self, cluster_id: &str, service: &str) {
        let _guard = self.lifecycle.lock().await;

        let transport = self
            .transports
            .get(cluster_id)
            .map(|entry| Arc::clone(entry.value()));
        if let Some(transport) = transport {
            transport.unsubscribe(service).await;
        }

        let mut config = self.config.lock().expect("config lock poisoned");
        if let Some(cluster) = config.clusters.get_mut(cluster_id) {
            cluster.services.remove(service);
        }

        tracing::info!(cluster = %cluster_id, service, "removed service");
    }

    // ---- Status ----

    /// Total number of active consumers across all clusters.
    pub fn active_consumer_count(&self) -> usize {
        self.transports
            .iter()
            .map(|entry| entry.value().active_count())
            .sum()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// A copy of the current configuration, reflecting dynamic mutations.
    pub fn config(&self) -> EventConfig {
        self.config.lock().expect("config lock poisoned").clone()
    }

    // ---- Internal ----

    async fn start_cluster(
        &self,
        cluster_id: &str,
        cluster: &ClusterConfig,
        config: &EventConfig,
    ) -> Result<(), ManagerError> {
        let transport = match self.transports.get(cluster_id) {
            Some(entry) => Arc::clone(entry.value()),
            None => {
                let transport = create_transport(cluster_id, cluster, config)?;
                self.transports
                    .insert(cluster_id.to_string(), Arc::clone(&transport));
                transport
            }
        };

        for (service, svc) in &cluster.services {
            if let Err(e) = transport
                .subscribe(service, svc.endpoint(), self.callback_for(cluster_id))
                .await
            {
                tracing::error!(
                    cluster = %cluster_id,
                    service = %service,
                    error = %e,
                    "failed to subscribe"
                );
            }
        }

        transport.start().await?;
        Ok(())
    }

    /// Delivery callback bound to one cluster; the transport supplies the
    /// service name per message.
    fn callback_for(&self, cluster_id: &str) -> MessageCallback {
        let pipeline = Arc::clone(&self.pipeline);
        let cluster_id = cluster_id.to_string();
        Arc::new(move |service, body| pipeline.process(&cluster_id, service, body))
    }
}

fn create_transport(
    cluster_id: &str,
    cluster: &ClusterConfig,
    config: &EventConfig,
) -> Result<Arc<dyn MessageTransport>, ManagerError> {
    match cluster.transport {
        TransportKind::Rabbitmq => Ok(Arc::new(RabbitMqTransport::new(
            cluster_id,
            cluster.rabbitmq.broker_config(config.reconnect_interval),
            config.topic.clone(),
            config.prefetch_count,
        ))),
        #[cfg(feature = "kafka")]
        TransportKind::Kafka => Ok(Arc::new(KafkaTransport::new(
            cluster_id,
            cluster.kafka.consumer_config(),
            config.topic.clone(),
        ))),
        #[cfg(not(feature = "kafka"))]
        TransportKind::Kafka => Err(ManagerError::Transport(TransportError::KafkaSupportMissing)),
    }
}

/// The per-message path: unwrap the envelope, parse the notification,
/// fan out to listeners. Shared by every cluster callback.
#[derive(Default)]
struct EventPipeline {
    unwrapper: EnvelopeUnwrapper,
    parser: NotificationParser,
    listeners: ListenerSet,
}

impl EventPipeline {
    fn process(&self, cluster_id: &str, service: &str, body: &[u8]) {
        let notification = match self.unwrapper.unwrap(body) {
            Ok(notification) => notification,
            Err(e) => {
                tracing::error!(
                    cluster = cluster_id,
                    service,
                    error = %e,
                    "failed to unwrap oslo.messaging envelope"
                );
                tracing::debug!(body = %String::from_utf8_lossy(body), "raw message body");
                return;
            }
        };

        if tracing::enabled!(tracing::Level::DEBUG) {
            let event_type = notification
                .get("event_type")
                .and_then(|value| value.as_str())
                .unwrap_or("unknown");
            tracing::debug!(cluster = cluster_id, service, event_type, "received notification");
        }

        // Parser skips (with its own logging) on anything it cannot handle.
        let Some(event) = self.parser.parse(cluster_id, service, &notification) else {
            return;
        };

        self.listeners.dispatch(&event);
    }
}
