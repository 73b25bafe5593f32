//! Error types for the oslo-parser crate.

/// Errors from unwrapping the oslo.messaging envelope.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The message body is not valid JSON
    #[error("message body is not valid JSON: {0}")]
    Outer(#[source] serde_json::Error),

    /// The envelope's `oslo.message` value is not a JSON string
    #[error("oslo.message is not a JSON-encoded string")]
    MessageNotString,

    /// The JSON string inside `oslo.message` failed to parse
    #[error("oslo.message does not contain valid JSON: {0}")]
    Inner(#[source] serde_json::Error),
}

/// Errors from building an [`OpenStackEvent`](crate::OpenStackEvent).
#[derive(Debug, thiserror::Error)]
pub enum EventBuildError {
    /// A required field was not supplied to the builder
    #[error("missing required event field: {0}")]
    MissingField(&'static str),
}
