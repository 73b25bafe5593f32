//! oslo.messaging envelope handling.

use serde_json::Value;

use crate::error::EnvelopeError;

const OSLO_VERSION: &str = "oslo.version";
const OSLO_MESSAGE: &str = "oslo.message";

/// Unwraps the oslo.messaging messagingv2 envelope.
///
/// messagingv2 wraps the actual notification in a two-field envelope:
///
/// ```json
/// {
///   "oslo.version": "2.0",
///   "oslo.message": "{\"event_type\":\"compute.instance.create.end\",...}"
/// }
/// ```
///
/// The `oslo.message` value is a JSON-encoded string that needs a second
/// parse. messagingv1 (legacy) sends the notification directly; those bodies
/// are returned as-is after the first parse.
///
/// The unwrapper holds no state and can be shared freely between threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeUnwrapper;

impl EnvelopeUnwrapper {
    pub fn new() -> Self {
        Self
    }

    /// Unwrap raw message bytes into the inner notification JSON.
    ///
    /// A non-`"2.0"` `oslo.version` is logged and tolerated; only malformed
    /// JSON (outer or inner) is an error.
    pub fn unwrap(&self, raw: &[u8]) -> Result<Value, EnvelopeError> {
        let root: Value = serde_json::from_slice(raw).map_err(EnvelopeError::Outer)?;

        let envelope = root
            .get(OSLO_VERSION)
            .is_some()
            .then(|| root.get(OSLO_MESSAGE))
            .flatten();

        let Some(message) = envelope else {
            tracing::debug!("no oslo.messaging envelope detected, treating as raw notification");
            return Ok(root);
        };

        let version = root.get(OSLO_VERSION).and_then(Value::as_str).unwrap_or("");
        if version != "2.0" {
            tracing::warn!(version, "unexpected oslo.version, attempting to parse anyway");
        }

        let inner = message.as_str().ok_or(EnvelopeError::MessageNotString)?;
        serde_json::from_str(inner).map_err(EnvelopeError::Inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unwraps_v2_envelope() {
        let notification = json!({"event_type": "volume.create.end", "payload": {"volume_id": "v-1"}});
        let envelope = json!({
            "oslo.version": "2.0",
            "oslo.message": notification.to_string(),
        });

        let unwrapped = EnvelopeUnwrapper::new()
            .unwrap(envelope.to_string().as_bytes())
            .unwrap();
        assert_eq!(unwrapped, notification);
    }

    #[test]
    fn test_passes_through_direct_format() {
        let notification = json!({"event_type": "image.update", "payload": {"id": "i-1"}});
        let unwrapped = EnvelopeUnwrapper::new()
            .unwrap(notification.to_string().as_bytes())
            .unwrap();
        assert_eq!(unwrapped, notification);
    }

    #[test]
    fn test_tolerates_unexpected_version() {
        let notification = json!({"event_type": "volume.delete.start"});
        let envelope = json!({
            "oslo.version": "3.0",
            "oslo.message": notification.to_string(),
        });

        let unwrapped = EnvelopeUnwrapper::new()
            .unwrap(envelope.to_string().as_bytes())
            .unwrap();
        assert_eq!(unwrapped, notification);
    }

    #[test]
    fn test_malformed_outer_json_is_an_error() {
        let err = EnvelopeUnwrapper::new().unwrap(b"{{").unwrap_err();
        assert!(matches!(err, EnvelopeError::Outer(_)));
    }

    #[test]
    fn test_malformed_inner_json_is_an_error() {
        let envelope = json!({
            "oslo.version": "2.0",
            "oslo.message": "not json",
        });
        let err = EnvelopeUnwrapper::new()
            .unwrap(envelope.to_string().as_bytes())
            .unwrap_err();
        assert!(matches!(err, EnvelopeError::Inner(_)));
    }

    #[test]
    fn test_non_string_message_is_an_error() {
        let envelope = json!({
            "oslo.version": "2.0",
            "oslo.message": {"event_type": "volume.create.end"},
        });
        let err = EnvelopeUnwrapper::new()
            .unwrap(envelope.to_string().as_bytes())
            .unwrap_err();
        assert!(matches!(err, EnvelopeError::MessageNotString));
    }

    #[test]
    fn test_version_without_message_is_direct_format() {
        // Only one of the two envelope keys present: not an envelope.
        let body = json!({"oslo.version": "2.0", "event_type": "image.update"});
        let unwrapped = EnvelopeUnwrapper::new()
            .unwrap(body.to_string().as_bytes())
            .unwrap();
        assert_eq!(unwrapped, body);
    }
}
