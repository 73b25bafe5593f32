//! Kafka consumer settings and topic naming.

use std::collections::HashMap;
use std::time::Duration;

use crate::endpoint::{extras, ServiceEndpoint};

/// Settings for the Kafka consumer of one cluster.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Bootstrap servers, e.g. `10.224.18.6:9092`
    pub bootstrap_servers: String,
    /// Consumer group id
    pub group_id: String,
    /// Offset reset policy: `earliest` or `latest`
    pub auto_offset_reset: String,
    /// Commit offsets automatically
    pub enable_auto_commit: bool,
    /// Kept for configuration parity with other oslo consumers; the Rust
    /// client streams records instead of polling fixed batches, so this has
    /// no client-level equivalent.
    pub max_poll_records: u32,
    /// Upper bound on one poll wait; also paces stop-flag checks
    pub poll_timeout: Duration,
    /// `SASL_PLAINTEXT`, `SASL_SSL`, ... (`None` for plaintext)
    pub security_protocol: Option<String>,
    /// `PLAIN`, `SCRAM-SHA-256`, ...
    pub sasl_mechanism: Option<String>,
    /// JAAS-style credential string; username and password are extracted
    /// from it since librdkafka takes them as separate properties
    pub sasl_jaas_config: Option<String>,
    /// Additional consumer properties passed through verbatim
    pub extra_properties: HashMap<String, String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            group_id: "openstack-event-consumer".to_string(),
            auto_offset_reset: "earliest".to_string(),
            enable_auto_commit: true,
            max_poll_records: 100,
            poll_timeout: Duration::from_secs(1),
            security_protocol: None,
            sasl_mechanism: None,
            sasl_jaas_config: None,
            extra_properties: HashMap::new(),
        }
    }
}

impl KafkaConfig {
    pub fn new(bootstrap_servers: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            group_id: group_id.into(),
            ..Default::default()
        }
    }
}

/// Derive the topic a service's notifications arrive on:
/// `topic-override` extra if set, else `{exchange or service}.{topic}`.
#[cfg_attr(not(feature = "kafka"), allow(dead_code))]
pub(crate) fn topic_for_service(
    service: &str,
    endpoint: &ServiceEndpoint,
    notification_topic: &str,
) -> String {
    if let Some(topic) = endpoint.extra(extras::TOPIC_OVERRIDE) {
        return topic.to_string();
    }
    let exchange = endpoint.extra_or(extras::EXCHANGE, service);
    format!("{exchange}.{notification_topic}")
}

/// Pull `username="..."` and `password="..."` out of a JAAS config line such
/// as produced for `PlainLoginModule`. Returns `None` when either is absent.
#[cfg_attr(not(feature = "kafka"), allow(dead_code))]
pub(crate) fn parse_jaas_credentials(jaas: &str) -> Option<(String, String)> {
    let field = |name: &str| -> Option<String> {
        let marker = format!("{name}=\"");
        let start = jaas.find(&marker)? + marker.len();
        let end = jaas[start..].find('"')? + start;
        Some(jaas[start..end].to_string())
    };
    Some((field("username")?, field("password")?))
}
