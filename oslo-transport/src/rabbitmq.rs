//! AMQP 0-9-1 transport.
//!
//! OpenStack convention gives every service its own RabbitMQ virtual host,
//! so this transport opens one connection per subscribed service. Per vhost
//! it declares a durable topic exchange named after the service, a durable
//! `openstack-event-{cluster}-{service}` queue, and bindings for the
//! `{topic}.info`, `{topic}.error` and `{topic}.warn` routing keys that
//! oslo.messaging publishes notifications under.
//!
//! Each session is driven by a supervising task: when the broker connection
//! drops, the task tears the session down, waits the configured recovery
//! interval and rebuilds the full topology, until the session is cancelled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicCancelOptions, BasicConsumeOptions, BasicQosOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::uri::{AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo};
use lapin::{Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::endpoint::{extras, ServiceEndpoint};
use crate::error::{Result, TransportError};
use crate::transport::{deliver, MessageCallback, MessageTransport};

/// Routing-key suffixes oslo.messaging publishes notifications under.
const ROUTING_PRIORITIES: [&str; 3] = ["info", "error", "warn"];

const REPLY_SUCCESS: u16 = 200;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Broker-level settings for one RabbitMQ cluster.
#[derive(Debug, Clone)]
pub struct RabbitMqConfig {
    pub host: String,
    pub port: u16,
    pub ssl: bool,
    /// Timeout for establishing a connection
    pub connection_timeout: Duration,
    /// AMQP heartbeat interval in seconds
    pub heartbeat: u16,
    /// Pause between recovery attempts after a lost connection
    pub recovery_interval: Duration,
}

impl Default for RabbitMqConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            ssl: false,
            connection_timeout: Duration::from_secs(10),
            heartbeat: 30,
            recovery_interval: Duration::from_secs(5),
        }
    }
}

impl RabbitMqConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }
}

/// Settings shared by every session of one transport instance.
struct SessionContext {
    cluster_id: String,
    config: RabbitMqConfig,
    topic: String,
    prefetch_count: u16,
}

/// AMQP implementation of [`MessageTransport`].
pub struct RabbitMqTransport {
    context: Arc<SessionContext>,
    /// service name -> consumer session
    sessions: tokio::sync::Mutex<HashMap<String, ConsumerSession>>,
    /// Number of sessions with an established consumer
    consumers: Arc<AtomicUsize>,
    running: AtomicBool,
}

impl RabbitMqTransport {
    /// `topic` is the oslo notification topic (normally `notifications`)
    /// used to derive the routing-key bindings.
    pub fn new(
        cluster_id: impl Into<String>,
        config: RabbitMqConfig,
        topic: impl Into<String>,
        prefetch_count: u16,
    ) -> Self {
        Self {
            context: Arc::new(SessionContext {
                cluster_id: cluster_id.into(),
                config,
                topic: topic.into(),
                prefetch_count,
            }),
            sessions: tokio::sync::Mutex::new(HashMap::new()),
            consumers: Arc::new(AtomicUsize::new(0)),
            running: AtomicBool::new(false),
        }
    }

    /// Connect the session and hand it to a supervising task.
    async fn activate(&self, service: &str, session: &mut ConsumerSession) -> Result<()> {
        let broker = BrokerSession::establish(&self.context, service, &session.endpoint).await?;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_session(
            Arc::clone(&self.context),
            service.to_string(),
            session.endpoint.clone(),
            session.callback.clone(),
            Arc::clone(&session.activity),
            broker,
            cancel.clone(),
        ));
        session.worker = Some(SessionWorker { cancel, handle });
        Ok(())
    }
}

#[async_trait]
impl MessageTransport for RabbitMqTransport {
    async fn subscribe(
        &self,
        service: &str,
        endpoint: ServiceEndpoint,
        callback: MessageCallback,
    ) -> Result<()> {
        let mut sessions = self.sessions.lock().await;

        if let Some(previous) = sessions.remove(service) {
            tracing::warn!(
                cluster = %self.context.cluster_id,
                service,
                "service already subscribed, replacing"
            );
            previous.release().await;
        }

        let mut session = ConsumerSession {
            endpoint,
            callback,
            activity: Arc::new(Activity::new(Arc::clone(&self.consumers))),
            worker: None,
        };

        if self.running.load(Ordering::SeqCst) {
            self.activate(service, &mut session)
                .await
                .map_err(|e| {
                    TransportError::Subscribe(format!(
                        "failed to start consumer for {}/{}: {}",
                        self.context.cluster_id, service, e
                    ))
                })?;
        }

        sessions.insert(service.to_string(), session);
        Ok(())
    }

    async fn unsubscribe(&self, service: &str) {
        let session = self.sessions.lock().await.remove(service);
        if let Some(session) = session {
            session.release().await;
            tracing::info!(
                cluster = %self.context.cluster_id,
                service,
                "unsubscribed"
            );
        }
    }

    async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                cluster = %self.context.cluster_id,
                "AMQP transport is already running"
            );
            return Ok(());
        }

        let mut sessions = self.sessions.lock().await;
        for (service, session) in sessions.iter_mut() {
            if session.worker.is_some() {
                continue;
            }
            if let Err(e) = self.activate(service, session).await {
                tracing::error!(
                    cluster = %self.context.cluster_id,
                    service = %service,
                    error = %e,
                    "failed to start consumer"
                );
            }
        }
        Ok(())
    }

    async fn close(&self) {
        self.running.store(false, Ordering::SeqCst);

        let drained: Vec<ConsumerSession> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain().map(|(_, session)| session).collect()
        };
        if drained.is_empty() {
            return;
        }

        for session in drained {
            session.release().await;
        }
        tracing::info!(cluster = %self.context.cluster_id, "AMQP transport closed");
    }

    fn active_count(&self) -> usize {
        self.consumers.load(Ordering::SeqCst)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Per-service subscription state.
struct ConsumerSession {
    endpoint: ServiceEndpoint,
    callback: MessageCallback,
    activity: Arc<Activity>,
    worker: Option<SessionWorker>,
}

impl ConsumerSession {
    async fn release(self) {
        if let Some(worker) = self.worker {
            worker.stop().await;
        }
    }
}

struct SessionWorker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SessionWorker {
    /// Signal the task to stop and wait for it, bounded.
    async fn stop(self) {
        self.cancel.cancel();
        let mut handle = self.handle;
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "session task ended abnormally"),
            Err(_) => {
                tracing::warn!("session task did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}

/// Tracks whether a session currently has an established consumer, and
/// keeps the transport-wide consumer count in step.
struct Activity {
    active: AtomicBool,
    consumers: Arc<AtomicUsize>,
}

impl Activity {
    fn new(consumers: Arc<AtomicUsize>) -> Self {
        Self {
            active: AtomicBool::new(false),
            consumers,
        }
    }

    fn set(&self, active: bool) {
        if self.active.swap(active, Ordering::SeqCst) != active {
            if active {
                self.consumers.fetch_add(1, Ordering::SeqCst);
            } else {
                self.consumers.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

impl Drop for Activity {
    fn drop(&mut self) {
        self.set(false);
    }
}

/// Supervise one service's consumer: consume until cancelled or lost, and
/// on loss rebuild the session after the recovery interval.
async fn run_session(
    context: Arc<SessionContext>,
    service: String,
    endpoint: ServiceEndpoint,
    callback: MessageCallback,
    activity: Arc<Activity>,
    first: BrokerSession,
    cancel: CancellationToken,
) {
    let mut broker = Some(first);

    while let Some(mut session) = broker.take() {
        activity.set(true);
        let stopped = session.consume(&service, &callback, &cancel).await;
        activity.set(false);
        session.teardown().await;

        if stopped {
            break;
        }

        tracing::warn!(
            cluster = %context.cluster_id,
            service = %service,
            "AMQP consumer lost, scheduling recovery"
        );
        broker = reconnect(&context, &service, &endpoint, &cancel).await;
    }
}

/// Retry session establishment until it succeeds or the session is
/// cancelled, pausing `recovery_interval` between attempts.
async fn reconnect(
    context: &SessionContext,
    service: &str,
    endpoint: &ServiceEndpoint,
    cancel: &CancellationToken,
) -> Option<BrokerSession> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(context.config.recovery_interval) => {}
        }
        match BrokerSession::establish(context, service, endpoint).await {
            Ok(session) => return Some(session),
            Err(e) => tracing::warn!(
                cluster = %context.cluster_id,
                service,
                error = %e,
                "AMQP recovery attempt failed"
            ),
        }
    }
}

/// An established connection, channel and consumer for one service.
struct BrokerSession {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
    consumer_tag: String,
}

impl BrokerSession {
    async fn establish(
        context: &SessionContext,
        service: &str,
        endpoint: &ServiceEndpoint,
    ) -> Result<Self> {
        let uri = amqp_uri(context, service, endpoint);
        let vhost = uri.vhost.clone();

        let mut properties = ConnectionProperties::default();
        properties.client_properties.insert(
            "connection_name".into(),
            AMQPValue::LongString(connection_name(&context.cluster_id, service).into()),
        );

        let connection = Connection::connect_uri(uri, properties).await?;
        let channel = connection.create_channel().await?;
        channel
            .basic_qos(context.prefetch_count, BasicQosOptions::default())
            .await?;

        let exchange = endpoint.extra_or(extras::EXCHANGE, service);
        let queue = queue_name(&context.cluster_id, service);

        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_declare(
                &queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        for priority in ROUTING_PRIORITIES {
            let routing_key = format!("{}.{}", context.topic, priority);
            channel
                .queue_bind(
                    &queue,
                    exchange,
                    &routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }

        // Auto-ack: delivery guarantees are the broker's defaults, by contract.
        let consumer = channel
            .basic_consume(
                &queue,
                "",
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        let consumer_tag = consumer.tag().as_str().to_string();

        tracing::info!(
            cluster = %context.cluster_id,
            service,
            vhost = %vhost,
            exchange,
            queue = %queue,
            "started AMQP consumer"
        );

        Ok(Self {
            connection,
            channel,
            consumer,
            consumer_tag,
        })
    }

    /// Pull deliveries until the session is cancelled (returns `true`) or
    /// the consumer is lost (returns `false`).
    async fn consume(
        &mut self,
        service: &str,
        callback: &MessageCallback,
        cancel: &CancellationToken,
    ) -> bool {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return true,
                delivery = self.consumer.next() => match delivery {
                    Some(Ok(delivery)) => deliver(callback, service, &delivery.data),
                    Some(Err(e)) => {
                        tracing::warn!(service, error = %e, "AMQP consumer error");
                        return false;
                    }
                    None => {
                        tracing::warn!(service, "AMQP consumer stream ended");
                        return false;
                    }
                }
            }
        }
    }

    /// Cancel the consumer and close channel and connection; every step
    /// tolerates an already-closed peer.
    async fn teardown(self) {
        if let Err(e) = self
            .channel
            .basic_cancel(&self.consumer_tag, BasicCancelOptions::default())
            .await
        {
            tracing::debug!(error = %e, "error cancelling consumer");
        }
        if let Err(e) = self.channel.close(REPLY_SUCCESS, "closing").await {
            tracing::debug!(error = %e, "error closing channel");
        }
        if let Err(e) = self.connection.close(REPLY_SUCCESS, "closing").await {
            tracing::debug!(error = %e, "error closing connection");
        }
    }
}

fn queue_name(cluster_id: &str, service: &str) -> String {
    format!("openstack-event-{cluster_id}-{service}")
}

fn connection_name(cluster_id: &str, service: &str) -> String {
    queue_name(cluster_id, service)
}

/// Build the connection URI for one service's virtual host. Constructing
/// the parsed form directly sidesteps percent-encoding of the `/`-prefixed
/// default vhost.
fn amqp_uri(context: &SessionContext, service: &str, endpoint: &ServiceEndpoint) -> AMQPUri {
    let default_vhost = format!("/{service}");
    AMQPUri {
        scheme: if context.config.ssl {
            AMQPScheme::AMQPS
        } else {
            AMQPScheme::AMQP
        },
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: endpoint.username.clone().unwrap_or_else(|| "guest".to_string()),
                password: endpoint.password.clone().unwrap_or_else(|| "guest".to_string()),
            },
            host: context.config.host.clone(),
            port: context.config.port,
        },
        vhost: endpoint.extra_or(extras::VHOST, &default_vhost).to_string(),
        query: AMQPQueryString {
            heartbeat: Some(context.config.heartbeat),
            connection_timeout: Some(context.config.connection_timeout.as_millis() as u64),
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_context() -> SessionContext {
        SessionContext {
            cluster_id: "cluster-a".to_string(),
            config: RabbitMqConfig::default(),
            topic: "notifications".to_string(),
            prefetch_count: 10,
        }
    }

    #[test]
    fn test_queue_name_pattern() {
        assert_eq!(
            queue_name("cluster-a", "nova"),
            "openstack-event-cluster-a-nova"
        );
        assert_eq!(connection_name("c", "cinder"), "openstack-event-c-cinder");
    }

    #[test]
    fn test_uri_defaults() {
        let context = test_context();
        let uri = amqp_uri(&context, "nova", &ServiceEndpoint::new());

        assert_eq!(uri.scheme, AMQPScheme::AMQP);
        assert_eq!(uri.vhost, "/nova");
        assert_eq!(uri.authority.userinfo.username, "guest");
        assert_eq!(uri.authority.port, 5672);
        assert_eq!(uri.query.heartbeat, Some(30));
        assert_eq!(uri.query.connection_timeout, Some(10_000));
    }

    #[test]
    fn test_uri_overrides() {
        let mut context = test_context();
        context.config.ssl = true;
        let endpoint = ServiceEndpoint::with_credentials("nova", "secret")
            .with_extra(extras::VHOST, "openstack");
        let uri = amqp_uri(&context, "nova", &endpoint);

        assert_eq!(uri.scheme, AMQPScheme::AMQPS);
        assert_eq!(uri.vhost, "openstack");
        assert_eq!(uri.authority.userinfo.username, "nova");
        assert_eq!(uri.authority.userinfo.password, "secret");
    }

    #[tokio::test]
    async fn test_close_without_start_is_safe() {
        let transport =
            RabbitMqTransport::new("c", RabbitMqConfig::default(), "notifications", 10);

        assert!(!transport.is_running());
        assert_eq!(transport.active_count(), 0);

        // Registering while stopped defers activation, so no broker is needed.
        let callback: MessageCallback = Arc::new(|_, _| {});
        transport
            .subscribe("nova", ServiceEndpoint::new(), callback)
            .await
            .unwrap();
        assert_eq!(transport.active_count(), 0);

        transport.close().await;
        transport.close().await;
        assert!(!transport.is_running());
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_service_is_noop() {
        let transport =
            RabbitMqTransport::new("c", RabbitMqConfig::default(), "notifications", 10);
        transport.unsubscribe("heat").await;
        assert_eq!(transport.active_count(), 0);
    }
}
