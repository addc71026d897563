//! Publication of alert lifecycle events.
//!
//! Every alert creation and resolution is turned into an
//! [`AlertLifecycleEvent`] and handed to an [`EventPublisher`]. Events are
//! keyed by endpoint so that a partitioned sink keeps per-endpoint order.
//! Built-in publishers post JSON to a webhook or write the event to the log.

pub mod error;
pub mod event;
pub mod log;
pub mod webhook;

#[cfg(test)]
mod tests;

pub use error::{NotifyError, Result};
pub use event::{AlertLifecycleEvent, EventType};
pub use log::LogPublisher;
pub use webhook::WebhookPublisher;

use async_trait::async_trait;

/// A sink for alert lifecycle events (message bus, webhook, log).
///
/// Implementations must not reorder events for the same
/// [`AlertLifecycleEvent::key`].
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Delivers one event.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery fails after any retries the
    /// implementation performs internally.
    async fn publish(&self, event: &AlertLifecycleEvent) -> Result<()>;

    /// Short publisher name used in logs (e.g. `"webhook"`).
    fn name(&self) -> &str;
}
