//! # oslo-transport
//!
//! Broker transports for consuming OpenStack oslo.messaging notifications.
//!
//! A [`MessageTransport`] owns every broker connection for one cluster and
//! hands raw message bytes to a caller-supplied [`MessageCallback`]; envelope
//! unwrapping and notification parsing happen upstream. Two backends are
//! provided:
//!
//! - [`RabbitMqTransport`] opens one AMQP connection per OpenStack service
//!   (each service lives in its own virtual host) and binds a durable queue
//!   to the service's topic exchange.
//! - `KafkaTransport` (behind the `kafka` cargo feature) runs a single
//!   consumer subscribed to one `<service>.notifications` style topic per
//!   service.
//!
//! Both support subscribing and unsubscribing services while running, and a
//! clean, idempotent shutdown. Third-party backends plug in by implementing
//! [`MessageTransport`].

mod endpoint;
mod error;
mod kafka;
mod rabbitmq;
mod transport;

pub use endpoint::{extras, ServiceEndpoint};
pub use error::{Result, TransportError};
pub use kafka::KafkaConfig;
#[cfg(feature = "kafka")]
pub use kafka::KafkaTransport;
pub use rabbitmq::{RabbitMqConfig, RabbitMqTransport};
pub use transport::{MessageCallback, MessageTransport};
