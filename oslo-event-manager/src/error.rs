//! Error types for the oslo-event-manager crate.

use oslo_transport::TransportError;

/// Errors from manager operations.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// The named cluster has no transport (not configured, or not started)
    #[error("cluster not found or not started: {0}")]
    ClusterNotFound(String),

    /// A transport operation failed
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors from loading an [`EventConfig`](crate::EventConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
