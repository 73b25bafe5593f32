//! The transport lifecycle contract.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use async_trait::async_trait;

use crate::endpoint::ServiceEndpoint;
use crate::error::Result;

/// Receives `(service_name, raw_bytes)` for every message a transport pulls
/// off the broker. Invoked from broker worker tasks, so it must be
/// re-entrant; messages for one service arrive in broker order, but
/// different services deliver concurrently.
pub type MessageCallback = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// SPI for message transport backends.
///
/// A transport owns all broker connections for one cluster, potentially
/// spanning several OpenStack services. Implementations must be thread-safe.
///
/// Lifecycle: register services with [`subscribe`](MessageTransport::subscribe),
/// open connections with [`start`](MessageTransport::start), optionally
/// mutate subscriptions while running, and release everything with
/// [`close`](MessageTransport::close).
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Register or replace the subscription for `service`.
    ///
    /// If the transport is already running the subscription is activated
    /// immediately, otherwise activation waits for `start`. Replacing an
    /// existing subscription releases its broker resources before the new
    /// one is installed.
    async fn subscribe(
        &self,
        service: &str,
        endpoint: ServiceEndpoint,
        callback: MessageCallback,
    ) -> Result<()>;

    /// Remove the subscription for `service` and release its broker
    /// resources. No-op when the service is not subscribed.
    async fn unsubscribe(&self, service: &str);

    /// Start consuming from all registered subscriptions.
    ///
    /// Calling `start` on a running transport is a warning no-op. A failure
    /// to start one service is reported and does not stop the others.
    async fn start(&self) -> Result<()>;

    /// Stop all consumers, release broker resources, and clear
    /// subscriptions. Idempotent, and safe on a never-started transport.
    async fn close(&self);

    /// Number of currently active consumers.
    fn active_count(&self) -> usize;

    /// Whether the transport has been started and not yet closed.
    fn is_running(&self) -> bool;
}

/// Invoke a delivery callback, containing any panic it raises.
///
/// A misbehaving callback is a bug in the embedding application; it gets
/// logged and the consumer keeps running.
pub(crate) fn deliver(callback: &MessageCallback, service: &str, body: &[u8]) {
    if catch_unwind(AssertUnwindSafe(|| callback(service, body))).is_err() {
        tracing::error!(service, "message callback panicked, dropping delivery");
    }
}
