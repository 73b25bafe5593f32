//! Kafka transport.
//!
//! When OpenStack is configured with `transport_url = kafka://...`, the
//! oslo.messaging kafka driver publishes notifications to topics named
//! `<exchange>.<topic>` where the exchange defaults to the service name and
//! the topic to `notifications` (so `nova.notifications`,
//! `cinder.notifications`, ...). There is no vhost concept; all services
//! share one cluster, so a single consumer subscribed to every derived topic
//! serves the whole transport.
//!
//! The consumer itself lives behind the `kafka` cargo feature so that builds
//! without a Kafka deployment carry no librdkafka dependency; the
//! configuration type stays available either way.

mod config;
#[cfg(feature = "kafka")]
mod transport;

pub use config::KafkaConfig;
#[cfg(feature = "kafka")]
pub use transport::KafkaTransport;
