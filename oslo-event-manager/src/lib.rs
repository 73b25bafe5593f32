//! # oslo-event-manager
//!
//! Entry point for consuming OpenStack oslo.messaging notifications as an
//! event-driven alternative to polling the REST APIs.
//!
//! The [`OpenStackEventManager`] owns one transport per configured cluster
//! (RabbitMQ by default, Kafka behind the `kafka` feature, or anything
//! implementing `MessageTransport` via
//! [`set_transport`](OpenStackEventManager::set_transport)), runs every raw
//! message through envelope unwrapping and notification parsing, and fans
//! the resulting [`OpenStackEvent`]s out to registered listeners.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use oslo_event_manager::prelude::*;
//!
//! let config = EventConfig::from_yaml_file("config.yml")?;
//! let manager = OpenStackEventManager::new(config);
//!
//! manager.add_listener(Arc::new(|event: &OpenStackEvent| {
//!     if event.terminal {
//!         println!("{} reached {:?}", event.subscription_key(), event.status);
//!     }
//! }));
//!
//! manager.start().await;
//! // ...
//! manager.close().await;
//! ```
//!
//! Listeners are called from broker worker tasks and must be re-entrant;
//! events for one `(cluster, service)` pair arrive in broker order, while
//! different services deliver concurrently.

pub mod config;
mod error;
mod listener;
mod manager;

pub use config::{
    ClusterConfig, EventConfig, KafkaSettings, RabbitmqSettings, ServiceConfig, TransportKind,
};
pub use error::{ConfigError, ManagerError};
pub use listener::EventListener;
pub use manager::OpenStackEventManager;

// Re-export the types listeners and custom transports interact with.
pub use oslo_parser::{OpenStackEvent, ResourceType};
pub use oslo_transport::{MessageCallback, MessageTransport, ServiceEndpoint, TransportError};

/// Convenient imports for the common case.
pub mod prelude {
    pub use crate::{
        EventConfig, EventListener, ManagerError, MessageTransport, OpenStackEvent,
        OpenStackEventManager, ResourceType, ServiceConfig,
    };
}
