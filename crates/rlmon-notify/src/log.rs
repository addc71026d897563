use crate::{AlertLifecycleEvent, EventPublisher, Result};
use async_trait::async_trait;

/// Writes each event to the `tracing` log. Used when no external sink is
/// configured.
#[derive(Debug, Default, Clone)]
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: &AlertLifecycleEvent) -> Result<()> {
        tracing::info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            endpoint_id = %event.endpoint_id,
            severity = %event.severity,
            utilization = %format!("{:.2}%", event.utilization_percent),
            "{}",
            event.message
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
