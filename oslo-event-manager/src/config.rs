//! Configuration for the event manager.
//!
//! The tree below deserializes from the application's YAML with kebab-case
//! keys, and can equally be built programmatically through the `Default`
//! impls. Both layouts are accepted when loading a file: the bare event
//! config, or the `openstack: event:` nesting used in full application
//! configuration files.
//!
//! RabbitMQ cluster (the default transport):
//!
//! ```yaml
//! openstack:
//!   event:
//!     topic: notifications
//!     clusters:
//!       cluster-a:
//!         rabbitmq:
//!           host: 10.224.18.6
//!           port: 5672
//!         vhosts:              # alias of `services`
//!           nova:
//!             username: nova
//!             password: password
//! ```
//!
//! Kafka cluster:
//!
//! ```yaml
//! openstack:
//!   event:
//!     clusters:
//!       cluster-a:
//!         transport: kafka
//!         kafka:
//!           bootstrap-servers: 10.224.18.6:9092
//!           group-id: openstack-event-consumer
//!         services:
//!           nova: {}
//!           cinder: {}
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use oslo_transport::{extras, KafkaConfig, RabbitMqConfig, ServiceEndpoint};

use crate::error::ConfigError;

/// Root configuration consumed by the manager.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EventConfig {
    /// Master switch; when false, `start` does nothing
    pub enabled: bool,
    /// oslo notification topic, producing routing keys like
    /// `notifications.info` and Kafka topics like `nova.notifications`
    pub topic: String,
    /// AMQP consumer prefetch per channel
    pub prefetch_count: u16,
    /// Pause between broker reconnection attempts
    #[serde(with = "duration_value")]
    pub reconnect_interval: Duration,
    /// Cluster configurations keyed by cluster id
    pub clusters: HashMap<String, ClusterConfig>,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            topic: "notifications".to_string(),
            prefetch_count: 10,
            reconnect_interval: Duration::from_secs(5),
            clusters: HashMap::new(),
        }
    }
}

impl EventConfig {
    /// Parse a YAML document, accepting either the bare event config or the
    /// `openstack: event:` nesting.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let doc: serde_yaml::Value = serde_yaml::from_str(raw)?;
        let node = doc
            .get("openstack")
            .and_then(|openstack| openstack.get("event"))
            .cloned()
            .unwrap_or(doc);
        Ok(serde_yaml::from_value(node)?)
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_yaml_str(&std::fs::read_to_string(path)?)
    }
}

/// Transport backend of a cluster. Each cluster is bound to exactly one
/// backend kind for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Rabbitmq,
    Kafka,
}

/// One OpenStack deployment: broker settings plus its services.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ClusterConfig {
    pub transport: TransportKind,
    pub rabbitmq: RabbitmqSettings,
    pub kafka: KafkaSettings,
    /// Service configurations keyed by OpenStack service name. For RabbitMQ
    /// these map to vhosts (hence the legacy alias); for Kafka, to topic
    /// subscriptions.
    #[serde(alias = "vhosts")]
    pub services: HashMap<String, ServiceConfig>,
}

/// RabbitMQ broker settings for one cluster.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RabbitmqSettings {
    pub host: String,
    pub port: u16,
    pub ssl: bool,
    pub connection_timeout_ms: u64,
    pub heartbeat_sec: u16,
}

impl Default for RabbitmqSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            ssl: false,
            connection_timeout_ms: 10_000,
            heartbeat_sec: 30,
        }
    }
}

impl RabbitmqSettings {
    pub(crate) fn broker_config(&self, recovery_interval: Duration) -> RabbitMqConfig {
        RabbitMqConfig {
            host: self.host.clone(),
            port: self.port,
            ssl: self.ssl,
            connection_timeout: Duration::from_millis(self.connection_timeout_ms),
            heartbeat: self.heartbeat_sec,
            recovery_interval,
        }
    }
}

/// Kafka consumer settings for one cluster.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct KafkaSettings {
    pub bootstrap_servers: String,
    pub group_id: String,
    pub auto_offset_reset: String,
    pub enable_auto_commit: bool,
    pub max_poll_records: u32,
    pub poll_timeout_ms: u64,
    pub security_protocol: Option<String>,
    pub sasl_mechanism: Option<String>,
    pub sasl_jaas_config: Option<String>,
}

impl Default for KafkaSettings {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            group_id: "openstack-event-consumer".to_string(),
            auto_offset_reset: "earliest".to_string(),
            enable_auto_commit: true,
            max_poll_records: 100,
            poll_timeout_ms: 1000,
            security_protocol: None,
            sasl_mechanism: None,
            sasl_jaas_config: None,
        }
    }
}

impl KafkaSettings {
    pub(crate) fn consumer_config(&self) -> KafkaConfig {
        KafkaConfig {
            bootstrap_servers: self.bootstrap_servers.clone(),
            group_id: self.group_id.clone(),
            auto_offset_reset: self.auto_offset_reset.clone(),
            enable_auto_commit: self.enable_auto_commit,
            max_poll_records: self.max_poll_records,
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            security_protocol: self.security_protocol.clone(),
            sasl_mechanism: self.sasl_mechanism.clone(),
            sasl_jaas_config: self.sasl_jaas_config.clone(),
            extra_properties: HashMap::new(),
        }
    }
}

/// Per-service settings: credentials plus transport-specific overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServiceConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    /// RabbitMQ vhost override; defaults to `"/" + service name`
    pub vhost: Option<String>,
    /// Exchange name override; defaults to the service name
    pub exchange: Option<String>,
    /// Kafka topic override, bypassing exchange-based naming
    pub topic_override: Option<String>,
}

impl ServiceConfig {
    /// Convert to the endpoint shape transports consume.
    pub fn endpoint(&self) -> ServiceEndpoint {
        let mut endpoint = ServiceEndpoint::new();
        endpoint.username = self.username.clone();
        endpoint.password = self.password.clone();
        if let Some(vhost) = &self.vhost {
            endpoint = endpoint.with_extra(extras::VHOST, vhost);
        }
        if let Some(exchange) = &self.exchange {
            endpoint = endpoint.with_extra(extras::EXCHANGE, exchange);
        }
        if let Some(topic) = &self.topic_override {
            endpoint = endpoint.with_extra(extras::TOPIC_OVERRIDE, topic);
        }
        endpoint
    }
}

/// Accepts a duration as integer seconds or as a `"5s"` / `"500ms"` string.
mod duration_value {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => parse(&text)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {text:?}"))),
        }
    }

    fn parse(text: &str) -> Option<Duration> {
        let text = text.trim();
        if let Some(millis) = text.strip_suffix("ms") {
            return millis.trim().parse().ok().map(Duration::from_millis);
        }
        if let Some(secs) = text.strip_suffix('s') {
            return secs.trim().parse().ok().map(Duration::from_secs);
        }
        text.parse().ok().map(Duration::from_secs)
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EventConfig::default();
        assert!(config.enabled);
        assert_eq!(config.topic, "notifications");
        assert_eq!(config.prefetch_count, 10);
        assert_eq!(config.reconnect_interval, Duration::from_secs(5));
        assert!(config.clusters.is_empty());
    }

    #[test]
    fn test_service_endpoint_conversion() {
        let svc = ServiceConfig {
            username: Some("nova".to_string()),
            password: Some("password".to_string()),
            vhost: Some("/custom".to_string()),
            exchange: None,
            topic_override: Some("nova-events".to_string()),
        };
        let endpoint = svc.endpoint();
        assert_eq!(endpoint.username.as_deref(), Some("nova"));
        assert_eq!(endpoint.extra(extras::VHOST), Some("/custom"));
        assert_eq!(endpoint.extra(extras::EXCHANGE), None);
        assert_eq!(endpoint.extra(extras::TOPIC_OVERRIDE), Some("nova-events"));
    }
}
