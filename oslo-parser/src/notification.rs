//! Notification parsing.
//!
//! Notification structure (after envelope unwrap):
//!
//! ```json
//! {
//!   "event_type": "compute.instance.create.end",
//!   "publisher_id": "nova-compute:host1",
//!   "timestamp": "2026-02-06 12:00:00.000000",
//!   "priority": "INFO",
//!   "message_id": "uuid-string",
//!   "payload": {
//!     "instance_id": "...",
//!     "state": "active",
//!     "old_state": "building"
//!   }
//! }
//! ```
//!
//! Nova versioned notifications nest the interesting fields one level down,
//! under a literal `nova_object.data` key inside `payload`.
//!
//! The per-service payload shapes are irregular, so id and status extraction
//! walk ordered field-name tables keyed by resource type. Supporting a new
//! shape means extending a table, not adding control flow.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use crate::event::OpenStackEvent;
use crate::resource::ResourceType;

const OSLO_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const NOVA_OBJECT_DATA: &str = "nova_object.data";

const PHASES: [&str; 3] = ["start", "end", "error"];

// Terminal states per resource kind.
const SERVER_TERMINAL: &[&str] = &[
    "active",
    "error",
    "deleted",
    "shutoff",
    "shelved_offloaded",
    "suspended",
    "paused",
    "stopped",
];
const VOLUME_TERMINAL: &[&str] = &[
    "available",
    "in-use",
    "error",
    "deleted",
    "error_deleting",
    "error_restoring",
];
const IMAGE_TERMINAL: &[&str] = &["active", "killed", "deleted", "deactivated"];
const STACK_TERMINAL: &[&str] = &[
    "create_complete",
    "create_failed",
    "update_complete",
    "update_failed",
    "delete_complete",
    "delete_failed",
    "rollback_complete",
    "rollback_failed",
];
const GENERIC_TERMINAL: &[&str] = &["active", "error", "deleted", "available", "down"];

const OLD_STATUS_FIELDS: &[&str] = &["old_state", "old_status", "previous_state"];

/// Parses an unwrapped oslo.messaging notification into an [`OpenStackEvent`].
///
/// Stateless; a single instance can serve every cluster and service.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotificationParser;

impl NotificationParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a notification, or return `None` when it should be skipped.
    ///
    /// A notification without `event_type` is skipped with a warning; any
    /// other extraction failure skips with an error log. The parser never
    /// propagates a failure to the delivery path.
    pub fn parse(
        &self,
        cluster_id: &str,
        service: &str,
        notification: &Value,
    ) -> Option<OpenStackEvent> {
        let Some(event_type) = text(notification, "event_type") else {
            tracing::warn!(
                cluster = cluster_id,
                service,
                "notification missing event_type, skipping"
            );
            return None;
        };

        let resource_type = ResourceType::from_event_type(event_type);
        let payload = notification.get("payload");

        let (action, phase) = action_phase(event_type, resource_type);
        let resource_id = extract_resource_id(payload, resource_type);
        let status = extract_status(payload, resource_type);
        let old_status = extract_old_status(payload);
        let timestamp = parse_timestamp(text(notification, "timestamp"));
        let terminal = is_terminal_status(status.as_deref(), resource_type);

        let event = OpenStackEvent::builder()
            .cluster_id(cluster_id)
            .service(service)
            .resource_type(resource_type)
            .resource_id(resource_id)
            .event_type(event_type)
            .action(action)
            .phase(phase)
            .priority(text(notification, "priority").map(str::to_string))
            .publisher_id(text(notification, "publisher_id").map(str::to_string))
            .message_id(text(notification, "message_id").map(str::to_string))
            .timestamp(timestamp)
            .status(status)
            .old_status(old_status)
            .terminal(terminal)
            .payload(payload.cloned())
            .build();

        match event {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::error!(
                    cluster = cluster_id,
                    service,
                    error = %e,
                    "failed to build event from notification, skipping"
                );
                None
            }
        }
    }
}

// ---- Resource ID extraction ----

/// Ordered id field names per resource kind, most specific first.
fn resource_id_fields(resource_type: ResourceType) -> &'static [&'static str] {
    match resource_type {
        ResourceType::Server => &["instance_id", "uuid", "id"],
        ResourceType::Volume => &["volume_id", "id"],
        ResourceType::Snapshot => &["snapshot_id", "id"],
        ResourceType::Backup => &["backup_id", "id"],
        ResourceType::Image => &["id", "image_id"],
        ResourceType::Network => &["network_id", "id"],
        ResourceType::Subnet => &["subnet_id", "id"],
        ResourceType::Port => &["port_id", "id"],
        ResourceType::Router => &["router_id", "id"],
        ResourceType::FloatingIp => &["floatingip_id", "id"],
        ResourceType::LoadBalancer => &["loadbalancer_id", "id"],
        ResourceType::Stack => &["stack_identity", "id"],
        _ => &["id", "resource_id", "uuid"],
    }
}

fn extract_resource_id(payload: Option<&Value>, resource_type: ResourceType) -> Option<String> {
    let payload = payload?;

    // Nova versioned notification shape first.
    if let Some(nova_data) = payload.get(NOVA_OBJECT_DATA) {
        if let Some(uuid) = text(nova_data, "uuid") {
            return Some(uuid.to_string());
        }
    }

    for field in resource_id_fields(resource_type) {
        if let Some(value) = text(payload, field) {
            return Some(value.to_string());
        }
    }

    // Last resort: nested resource object.
    payload
        .get("resource_info")
        .and_then(|info| text(info, "id"))
        .map(str::to_string)
}

// ---- Status extraction ----

/// Ordered status field names per resource kind.
fn status_fields(resource_type: ResourceType) -> &'static [&'static str] {
    match resource_type {
        ResourceType::Server => &["state", "status", "vm_state"],
        ResourceType::Volume | ResourceType::Snapshot | ResourceType::Backup => &["status"],
        ResourceType::Image => &["status"],
        ResourceType::Stack => &["state", "stack_status"],
        ResourceType::LoadBalancer => &["operating_status", "provisioning_status", "status"],
        _ => &["status", "state"],
    }
}

fn extract_status(payload: Option<&Value>, resource_type: ResourceType) -> Option<String> {
    let payload = payload?;

    if let Some(nova_data) = payload.get(NOVA_OBJECT_DATA) {
        if let Some(state) = text(nova_data, "state") {
            return Some(state.to_lowercase());
        }
    }

    for field in status_fields(resource_type) {
        if let Some(value) = text(payload, field) {
            return Some(value.to_lowercase());
        }
    }
    None
}

fn extract_old_status(payload: Option<&Value>) -> Option<String> {
    let payload = payload?;

    if let Some(nova_data) = payload.get(NOVA_OBJECT_DATA) {
        if let Some(old_state) = text(nova_data, "old_state") {
            return Some(old_state.to_lowercase());
        }
    }

    for field in OLD_STATUS_FIELDS {
        if let Some(value) = text(payload, field) {
            return Some(value.to_lowercase());
        }
    }
    None
}

// ---- Terminal state detection ----

fn is_terminal_status(status: Option<&str>, resource_type: ResourceType) -> bool {
    let Some(status) = status else {
        return false;
    };
    let lower = status.to_lowercase();
    let table = match resource_type {
        ResourceType::Server => SERVER_TERMINAL,
        ResourceType::Volume | ResourceType::Snapshot | ResourceType::Backup => VOLUME_TERMINAL,
        ResourceType::Image => IMAGE_TERMINAL,
        ResourceType::Stack => STACK_TERMINAL,
        _ => GENERIC_TERMINAL,
    };
    table.contains(&lower.as_str())
}

// ---- Action/phase parsing ----

/// Decompose an event type into action and phase.
///
/// `compute.instance.create.end` becomes (`create`, `end`);
/// `image.update` becomes (`update`, none). Only `start`, `end` and `error`
/// count as phases.
fn action_phase(
    event_type: &str,
    resource_type: ResourceType,
) -> (Option<String>, Option<String>) {
    let prefix = resource_type.prefix();
    let suffix = event_type.strip_prefix(prefix).unwrap_or(event_type);
    let suffix = suffix.strip_prefix('.').unwrap_or(suffix);

    if suffix.is_empty() {
        return (None, None);
    }

    let parts: Vec<&str> = suffix.split('.').collect();
    let action = Some(parts[0].to_string());

    if parts.len() > 1 {
        let last = parts[parts.len() - 1];
        if PHASES.contains(&last) {
            return (action, Some(last.to_string()));
        }
    }
    (action, None)
}

// ---- Timestamp parsing ----

/// Parse the oslo.messaging timestamp format `2026-02-06 12:00:00.000000`,
/// treated as UTC. Unparseable or absent timestamps fall back to now.
fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    let Some(raw) = raw else {
        return Utc::now();
    };
    match NaiveDateTime::parse_from_str(raw, OSLO_TIMESTAMP_FORMAT) {
        Ok(naive) => naive.and_utc(),
        Err(_) => {
            tracing::debug!(timestamp = raw, "cannot parse timestamp, using current time");
            Utc::now()
        }
    }
}

fn text<'a>(node: &'a Value, field: &str) -> Option<&'a str> {
    node.get(field).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn parse(notification: &Value) -> Option<OpenStackEvent> {
        NotificationParser::new().parse("c", "svc", notification)
    }

    #[test]
    fn test_missing_event_type_skips() {
        assert!(parse(&json!({"payload": {"id": "x"}})).is_none());
    }

    #[test]
    fn test_action_and_phase() {
        let cases = [
            ("compute.instance.create.end", Some("create"), Some("end")),
            ("volume.delete.start", Some("delete"), Some("start")),
            ("image.update", Some("update"), None),
            ("compute.instance.power_on.end", Some("power_on"), Some("end")),
            ("compute.instance.resize.confirm.end", Some("resize"), Some("end")),
        ];
        for (event_type, action, phase) in cases {
            let event = parse(&json!({"event_type": event_type})).unwrap();
            assert_eq!(event.action.as_deref(), action, "action of {event_type}");
            assert_eq!(event.phase.as_deref(), phase, "phase of {event_type}");
        }
    }

    #[test]
    fn test_bare_prefix_has_no_action_or_phase() {
        let event = parse(&json!({"event_type": "image"})).unwrap();
        assert_eq!(event.action, None);
        assert_eq!(event.phase, None);
    }

    #[test]
    fn test_unknown_resource_uses_whole_event_type() {
        let event = parse(&json!({"event_type": "unrelated.thing.end"})).unwrap();
        assert_eq!(event.resource_type, ResourceType::Unknown);
        assert_eq!(event.action.as_deref(), Some("unrelated"));
        assert_eq!(event.phase.as_deref(), Some("end"));
    }

    #[test]
    fn test_nova_versioned_payload() {
        let event = parse(&json!({
            "event_type": "compute.instance.update",
            "payload": {
                "nova_object.data": {
                    "uuid": "X",
                    "state": "ACTIVE",
                    "old_state": "Building"
                }
            }
        }))
        .unwrap();
        assert_eq!(event.resource_id.as_deref(), Some("X"));
        assert_eq!(event.status.as_deref(), Some("active"));
        assert_eq!(event.old_status.as_deref(), Some("building"));
        assert!(event.terminal);
    }

    #[test]
    fn test_resource_id_field_order() {
        let event = parse(&json!({
            "event_type": "compute.instance.create.end",
            "payload": {"uuid": "u", "instance_id": "I", "id": "i"}
        }))
        .unwrap();
        assert_eq!(event.resource_id.as_deref(), Some("I"));
    }

    #[test]
    fn test_resource_info_last_resort() {
        let event = parse(&json!({
            "event_type": "network.create.end",
            "payload": {"resource_info": {"id": "R"}}
        }))
        .unwrap();
        assert_eq!(event.resource_id.as_deref(), Some("R"));
    }

    #[test]
    fn test_absent_payload() {
        let event = parse(&json!({"event_type": "volume.create.start"})).unwrap();
        assert_eq!(event.resource_id, None);
        assert_eq!(event.status, None);
        assert!(!event.terminal);
        assert_eq!(event.payload, None);
    }

    #[test]
    fn test_terminal_classification() {
        let cases = [
            ("compute.instance.update", json!({"state": "active"}), true),
            ("compute.instance.update", json!({"state": "building"}), false),
            ("volume.update.end", json!({"status": "in-use"}), true),
            ("volume.create.start", json!({"status": "creating"}), false),
            ("image.update", json!({"status": "deactivated"}), true),
            ("orchestration.stack.create.end", json!({"state": "create_complete"}), true),
            ("orchestration.stack.create.start", json!({"state": "create_in_progress"}), false),
            ("network.create.end", json!({"status": "down"}), true),
        ];
        for (event_type, payload, terminal) in cases {
            let event = parse(&json!({"event_type": event_type, "payload": payload})).unwrap();
            assert_eq!(event.terminal, terminal, "terminal of {event_type} {payload}");
        }
    }

    #[test]
    fn test_status_comparison_is_case_insensitive() {
        let event = parse(&json!({
            "event_type": "compute.instance.update",
            "payload": {"state": "ACTIVE"}
        }))
        .unwrap();
        assert_eq!(event.status.as_deref(), Some("active"));
        assert!(event.terminal);
    }

    #[test]
    fn test_loadbalancer_status_precedence() {
        let event = parse(&json!({
            "event_type": "loadbalancer.update.end",
            "payload": {
                "provisioning_status": "PENDING_UPDATE",
                "operating_status": "ONLINE"
            }
        }))
        .unwrap();
        assert_eq!(event.status.as_deref(), Some("online"));
    }

    #[test]
    fn test_timestamp_parsing() {
        let event = parse(&json!({
            "event_type": "volume.create.end",
            "timestamp": "2026-02-06 12:00:00.000000"
        }))
        .unwrap();
        assert_eq!(event.timestamp, Utc.with_ymd_and_hms(2026, 2, 6, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_unparseable_timestamp_falls_back_to_now() {
        let before = Utc::now();
        let event = parse(&json!({
            "event_type": "volume.create.end",
            "timestamp": "last tuesday"
        }))
        .unwrap();
        assert!(event.timestamp >= before);
    }

    #[test]
    fn test_verbatim_metadata_fields() {
        let event = parse(&json!({
            "event_type": "volume.create.end",
            "priority": "INFO",
            "publisher_id": "cinder-volume:host1",
            "message_id": "m-1"
        }))
        .unwrap();
        assert_eq!(event.priority.as_deref(), Some("INFO"));
        assert_eq!(event.publisher_id.as_deref(), Some("cinder-volume:host1"));
        assert_eq!(event.message_id.as_deref(), Some("m-1"));
    }
}
