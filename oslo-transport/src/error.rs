//! Error types for the oslo-transport crate.

/// Errors from broker transports.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to reach or authenticate against the broker
    #[error("failed to connect to broker: {0}")]
    Connect(String),

    /// Failed to install or update a subscription
    #[error("failed to subscribe: {0}")]
    Subscribe(String),

    /// A consumer failed while the transport was running
    #[error("consumer error: {0}")]
    Consumer(String),

    /// An AMQP protocol or I/O error
    #[error(transparent)]
    Amqp(#[from] lapin::Error),

    /// A Kafka client error
    #[cfg(feature = "kafka")]
    #[error(transparent)]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// A Kafka transport was requested from a build without Kafka support
    #[error(
        "kafka transport requested but this build has no Kafka client; \
         enable the `kafka` cargo feature of oslo-transport"
    )]
    KafkaSupportMissing,
}

/// Convenience alias for transport results.
pub type Result<T> = std::result::Result<T, TransportError>;
