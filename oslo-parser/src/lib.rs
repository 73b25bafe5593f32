//! # oslo-parser
//!
//! A micro-crate for decoding OpenStack oslo.messaging notifications into a
//! uniform event model.
//!
//! oslo.messaging delivers notifications either directly as JSON (the legacy
//! v1 format) or wrapped in a two-field envelope whose `oslo.message` value
//! is itself a JSON-encoded string (messagingv2). This crate unwraps both
//! shapes and extracts a canonical [`OpenStackEvent`] from the heterogeneous
//! per-service payloads, without making any broker or network calls.
//!
//! The decoding pipeline is two stages:
//!
//! 1. [`EnvelopeUnwrapper`] turns raw message bytes into the inner
//!    notification JSON.
//! 2. [`NotificationParser`] turns the notification JSON into an
//!    [`OpenStackEvent`], or skips it when no `event_type` is present.
//!
//! Both stages are stateless and safe to share across threads.

mod envelope;
mod error;
mod event;
mod notification;
mod resource;

pub use envelope::EnvelopeUnwrapper;
pub use error::{EnvelopeError, EventBuildError};
pub use event::{OpenStackEvent, OpenStackEventBuilder};
pub use notification::NotificationParser;
pub use resource::ResourceType;
