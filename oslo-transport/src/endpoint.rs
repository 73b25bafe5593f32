//! Per-service connection parameters.

use std::collections::HashMap;

/// Keys recognised in [`ServiceEndpoint`] extras. Each transport reads only
/// the keys it understands and ignores the rest.
pub mod extras {
    /// RabbitMQ virtual host override. Defaults to `"/" + service`.
    pub const VHOST: &str = "vhost";
    /// Exchange name override (RabbitMQ), also the first segment of the
    /// derived Kafka topic. Defaults to the service name.
    pub const EXCHANGE: &str = "exchange";
    /// Full Kafka topic override, bypassing exchange-based naming.
    pub const TOPIC_OVERRIDE: &str = "topic-override";
}

/// Transport-agnostic connection parameters for one OpenStack service.
///
/// Credentials plus a free-form extras map for transport-specific settings;
/// see [`extras`] for the keys the built-in transports understand.
#[derive(Debug, Clone, Default)]
pub struct ServiceEndpoint {
    pub username: Option<String>,
    pub password: Option<String>,
    extras: HashMap<String, String>,
}

impl ServiceEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Endpoint with username and password set.
    pub fn with_credentials(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            extras: HashMap::new(),
        }
    }

    /// Set a transport-specific extra parameter.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }

    /// Look up an extra parameter.
    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extras.get(key).map(String::as_str)
    }

    /// Look up an extra parameter, falling back to `default`.
    pub fn extra_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.extra(key).unwrap_or(default)
    }
}
