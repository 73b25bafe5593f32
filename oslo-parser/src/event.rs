//! Canonical event model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::EventBuildError;
use crate::resource::ResourceType;

/// A single parsed oslo.messaging notification.
///
/// Immutable once built. `cluster_id` and `event_type` are always present;
/// everything else depends on what the notification payload carried.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenStackEvent {
    /// Cluster identifier, taken from the configuration key
    pub cluster_id: String,
    /// OpenStack service that produced the event (nova, cinder, neutron, ...)
    pub service: String,
    /// Resource kind inferred from `event_type`
    pub resource_type: ResourceType,
    /// Resource ID extracted from the payload (instance_id, volume_id, ...)
    pub resource_id: Option<String>,
    /// Full oslo.messaging event type, e.g. `compute.instance.create.end`
    pub event_type: String,
    /// Action segment of the event type (`create`, `delete`, `resize`, ...)
    pub action: Option<String>,
    /// Phase segment of the event type (`start`, `end`, `error`)
    pub phase: Option<String>,
    /// Notification priority (`INFO`, `WARN`, `ERROR`, ...)
    pub priority: Option<String>,
    /// oslo.messaging publisher, e.g. `nova-compute:host1`
    pub publisher_id: Option<String>,
    /// oslo.messaging message id
    pub message_id: Option<String>,
    /// Notification timestamp, or the time of parsing when absent
    pub timestamp: DateTime<Utc>,
    /// Current resource status, lower-cased
    pub status: Option<String>,
    /// Previous resource status, lower-cased
    pub old_status: Option<String>,
    /// Whether `status` is a terminal state for this resource kind
    pub terminal: bool,
    /// The raw `payload` subtree for consumer-side processing
    pub payload: Option<Value>,
}

impl OpenStackEvent {
    /// Start building an event.
    pub fn builder() -> OpenStackEventBuilder {
        OpenStackEventBuilder::default()
    }

    /// Key for matching events against per-resource subscriptions:
    /// `{cluster_id}/{resource_type}/{resource_id}`.
    pub fn subscription_key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.cluster_id,
            self.resource_type,
            self.resource_id.as_deref().unwrap_or("")
        )
    }
}

impl std::fmt::Display for OpenStackEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} {} {}[{}] {:?} -> {:?} (terminal: {})",
            self.cluster_id,
            self.service,
            self.event_type,
            self.resource_type,
            self.resource_id.as_deref().unwrap_or("?"),
            self.old_status,
            self.status,
            self.terminal
        )
    }
}

/// Builder for [`OpenStackEvent`].
///
/// `cluster_id` and `event_type` are required; `resource_type` is derived
/// from `event_type` when not given, and `timestamp` defaults to now.
#[derive(Debug, Default)]
pub struct OpenStackEventBuilder {
    cluster_id: Option<String>,
    service: Option<String>,
    resource_type: Option<ResourceType>,
    resource_id: Option<String>,
    event_type: Option<String>,
    action: Option<String>,
    phase: Option<String>,
    priority: Option<String>,
    publisher_id: Option<String>,
    message_id: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    status: Option<String>,
    old_status: Option<String>,
    terminal: bool,
    payload: Option<Value>,
}

impl OpenStackEventBuilder {
    pub fn cluster_id(mut self, cluster_id: impl Into<String>) -> Self {
        self.cluster_id = Some(cluster_id.into());
        self
    }

    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn resource_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_type = Some(resource_type);
        self
    }

    pub fn resource_id(mut self, resource_id: Option<String>) -> Self {
        self.resource_id = resource_id;
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn action(mut self, action: Option<String>) -> Self {
        self.action = action;
        self
    }

    pub fn phase(mut self, phase: Option<String>) -> Self {
        self.phase = phase;
        self
    }

    pub fn priority(mut self, priority: Option<String>) -> Self {
        self.priority = priority;
        self
    }

    pub fn publisher_id(mut self, publisher_id: Option<String>) -> Self {
        self.publisher_id = publisher_id;
        self
    }

    pub fn message_id(mut self, message_id: Option<String>) -> Self {
        self.message_id = message_id;
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn status(mut self, status: Option<String>) -> Self {
        self.status = status;
        self
    }

    pub fn old_status(mut self, old_status: Option<String>) -> Self {
        self.old_status = old_status;
        self
    }

    pub fn terminal(mut self, terminal: bool) -> Self {
        self.terminal = terminal;
        self
    }

    pub fn payload(mut self, payload: Option<Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Build the event, validating required fields.
    pub fn build(self) -> Result<OpenStackEvent, EventBuildError> {
        let cluster_id = self
            .cluster_id
            .ok_or(EventBuildError::MissingField("cluster_id"))?;
        let event_type = self
            .event_type
            .ok_or(EventBuildError::MissingField("event_type"))?;

        let resource_type = self
            .resource_type
            .unwrap_or_else(|| ResourceType::from_event_type(&event_type));

        Ok(OpenStackEvent {
            cluster_id,
            service: self.service.unwrap_or_default(),
            resource_type,
            resource_id: self.resource_id,
            event_type,
            action: self.action,
            phase: self.phase,
            priority: self.priority,
            publisher_id: self.publisher_id,
            message_id: self.message_id,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            status: self.status,
            old_status: self.old_status,
            terminal: self.terminal,
            payload: self.payload,
        })
    }
}
