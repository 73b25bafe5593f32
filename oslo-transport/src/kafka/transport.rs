//! The librdkafka-backed consumer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::BorrowedMessage;
use rdkafka::{ClientConfig, Message};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::config::{parse_jaas_credentials, topic_for_service, KafkaConfig};
use crate::endpoint::ServiceEndpoint;
use crate::error::{Result, TransportError};
use crate::transport::{deliver, MessageCallback, MessageTransport};

const ERROR_BACKOFF: Duration = Duration::from_secs(1);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka implementation of [`MessageTransport`].
///
/// One consumer shared by every service of the cluster; subscribing and
/// unsubscribing while running re-issue the consumer's topic subscription
/// with the updated union of derived topic names.
pub struct KafkaTransport {
    cluster_id: String,
    config: KafkaConfig,
    notification_topic: String,
    /// service name -> subscription
    subscriptions: Arc<DashMap<String, KafkaSubscription>>,
    consumer: std::sync::Mutex<Option<Arc<StreamConsumer>>>,
    worker: tokio::sync::Mutex<Option<PollWorker>>,
    running: AtomicBool,
}

struct KafkaSubscription {
    callback: MessageCallback,
    topic: String,
}

struct PollWorker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl KafkaTransport {
    pub fn new(
        cluster_id: impl Into<String>,
        config: KafkaConfig,
        notification_topic: impl Into<String>,
    ) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            config,
            notification_topic: notification_topic.into(),
            subscriptions: Arc::new(DashMap::new()),
            consumer: std::sync::Mutex::new(None),
            worker: tokio::sync::Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    fn client_config(&self) -> ClientConfig {
        let mut cc = ClientConfig::new();
        cc.set("bootstrap.servers", self.config.bootstrap_servers.as_str())
            .set("group.id", self.config.group_id.as_str())
            .set("auto.offset.reset", self.config.auto_offset_reset.as_str())
            .set(
                "enable.auto.commit",
                if self.config.enable_auto_commit { "true" } else { "false" },
            );

        if let Some(protocol) = &self.config.security_protocol {
            cc.set("security.protocol", protocol.as_str());
        }
        if let Some(mechanism) = &self.config.sasl_mechanism {
            cc.set("sasl.mechanism", mechanism.as_str());
        }
        if let Some(jaas) = &self.config.sasl_jaas_config {
            match parse_jaas_credentials(jaas) {
                Some((username, password)) => {
                    cc.set("sasl.username", username).set("sasl.password", password);
                }
                None => tracing::warn!(
                    cluster = %self.cluster_id,
                    "could not extract credentials from sasl_jaas_config, ignoring it"
                ),
            }
        }
        for (key, value) in &self.config.extra_properties {
            cc.set(key.as_str(), value.as_str());
        }
        cc
    }

    fn topic_names(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .subscriptions
            .iter()
            .map(|entry| entry.value().topic.clone())
            .collect();
        topics.sort();
        topics.dedup();
        topics
    }

    /// Point the consumer at the current union of subscribed topics.
    fn update_topic_subscription(&self) -> Result<()> {
        let consumer = self.consumer.lock().expect("consumer lock poisoned").clone();
        let Some(consumer) = consumer else {
            return Ok(());
        };
        let topics = self.topic_names();
        let refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer.subscribe(&refs)?;
        tracing::debug!(cluster = %self.cluster_id, ?topics, "updated kafka topic subscription");
        Ok(())
    }
}

#[async_trait]
impl MessageTransport for KafkaTransport {
    async fn subscribe(
        &self,
        service: &str,
        endpoint: ServiceEndpoint,
        callback: MessageCallback,
    ) -> Result<()> {
        let topic = topic_for_service(service, &endpoint, &self.notification_topic);
        tracing::debug!(
            cluster = %self.cluster_id,
            service,
            topic = %topic,
            "registered subscription"
        );
        self.subscriptions
            .insert(service.to_string(), KafkaSubscription { callback, topic });

        if self.running.load(Ordering::SeqCst) {
            self.update_topic_subscription()?;
        }
        Ok(())
    }

    async fn unsubscribe(&self, service: &str) {
        self.subscriptions.remove(service);
        if self.running.load(Ordering::SeqCst) {
            if let Err(e) = self.update_topic_subscription() {
                tracing::error!(
                    cluster = %self.cluster_id,
                    service,
                    error = %e,
                    "failed to update topic subscription"
                );
            }
        }
        tracing::info!(cluster = %self.cluster_id, service, "unsubscribed");
    }

    async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!(cluster = %self.cluster_id, "kafka transport is already running");
            return Ok(());
        }

        if self.subscriptions.is_empty() {
            tracing::warn!(cluster = %self.cluster_id, "no subscriptions registered");
            return Ok(());
        }

        let consumer: StreamConsumer = self.client_config().create().map_err(|e| {
            self.running.store(false, Ordering::SeqCst);
            TransportError::Connect(format!(
                "failed to create kafka consumer for cluster {}: {}",
                self.cluster_id, e
            ))
        })?;
        let consumer = Arc::new(consumer);
        *self.consumer.lock().expect("consumer lock poisoned") = Some(Arc::clone(&consumer));

        if let Err(e) = self.update_topic_subscription() {
            self.running.store(false, Ordering::SeqCst);
            *self.consumer.lock().expect("consumer lock poisoned") = None;
            return Err(e);
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            self.cluster_id.clone(),
            consumer,
            Arc::clone(&self.subscriptions),
            self.config.poll_timeout,
            cancel.clone(),
        ));
        *self.worker.lock().await = Some(PollWorker { cancel, handle });

        tracing::info!(
            cluster = %self.cluster_id,
            topics = ?self.topic_names(),
            "kafka transport started"
        );
        Ok(())
    }

    async fn close(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);

        if let Some(worker) = self.worker.lock().await.take() {
            worker.cancel.cancel();
            let mut handle = worker.handle;
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "poll worker ended abnormally"),
                Err(_) => {
                    tracing::warn!(cluster = %self.cluster_id, "poll worker did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        *self.consumer.lock().expect("consumer lock poisoned") = None;
        self.subscriptions.clear();

        if was_running {
            tracing::info!(cluster = %self.cluster_id, "kafka transport closed");
        }
    }

    fn active_count(&self) -> usize {
        if self.running.load(Ordering::SeqCst) {
            self.subscriptions.len()
        } else {
            0
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Consume until cancelled. Every error inside the loop is logged and
/// followed by a short back-off; only cancellation ends the loop.
async fn poll_loop(
    cluster_id: String,
    consumer: Arc<StreamConsumer>,
    subscriptions: Arc<DashMap<String, KafkaSubscription>>,
    poll_timeout: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(cluster = %cluster_id, "kafka poll loop started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            polled = tokio::time::timeout(poll_timeout, consumer.recv()) => match polled {
                // Poll window elapsed without a record
                Err(_) => continue,
                Ok(Ok(message)) => route_record(&subscriptions, &message),
                Ok(Err(e)) => {
                    tracing::error!(cluster = %cluster_id, error = %e, "error in kafka poll loop");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    }
                }
            }
        }
    }

    tracing::info!(cluster = %cluster_id, "kafka poll loop stopped");
}

/// Map a record back to the service owning its topic and hand it over.
///
/// Preferred path is the reverse lookup against known subscriptions; the
/// fallback strips everything from the first `.` on, which recovers the
/// service from default-named topics like `nova.notifications`.
fn route_record(
    subscriptions: &DashMap<String, KafkaSubscription>,
    message: &BorrowedMessage<'_>,
) {
    let topic = message.topic();

    let service = subscriptions
        .iter()
        .find_map(|entry| (entry.value().topic == topic).then(|| entry.key().clone()))
        .unwrap_or_else(|| topic.split('.').next().unwrap_or(topic).to_string());

    // Clone the callback out so no map guard is held during delivery.
    let callback = subscriptions.get(&service).map(|sub| sub.callback.clone());
    match callback {
        Some(callback) => deliver(&callback, &service, message.payload().unwrap_or_default()),
        None => tracing::debug!(topic, "no subscription for topic, skipping"),
    }
}
