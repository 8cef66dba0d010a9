//! Event-to-notification routing.
//!
//! [`NotificationRouter`] subscribes to the [`EventBus`](crate::EventBus)
//! and hands each [`JobEvent`] to the configured delivery channels. It runs
//! as its own task, so slow or failing delivery never holds up the monitor.

use tokio::sync::broadcast;

use crate::bus::JobEvent;
use crate::delivery::email::EmailDelivery;

/// Routes job events to their owners.
pub struct NotificationRouter {
    email: Option<EmailDelivery>,
}

impl NotificationRouter {
    /// Create a router. Without an email channel, events are only logged.
    pub fn new(email: Option<EmailDelivery>) -> Self {
        Self { email }
    }

    /// Run the routing loop.
    ///
    /// The loop exits when the channel is closed (i.e. the
    /// [`EventBus`](crate::EventBus) is dropped).
    pub async fn run(self, mut receiver: broadcast::Receiver<JobEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => self.route(&event).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Notification router lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, notification router shutting down");
                    break;
                }
            }
        }
    }

    /// Deliver a single event. Failures are logged and swallowed.
    async fn route(&self, event: &JobEvent) {
        tracing::info!(
            job_id = event.job_id,
            recipient = %event.recipient,
            event_type = %event.event_type(),
            "Job notification",
        );

        let Some(email) = &self.email else {
            return;
        };
        if event.recipient.trim().is_empty() {
            tracing::debug!(job_id = event.job_id, "No owner address, skipping email");
            return;
        }

        if let Err(e) = email.deliver(event).await {
            tracing::error!(
                error = %e,
                job_id = event.job_id,
                recipient = %event.recipient,
                "Failed to deliver notification email",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use trackq_core::status::MediaStatus;

    use super::*;
    use crate::bus::EventBus;

    #[tokio::test]
    async fn stops_when_bus_is_dropped() {
        let bus = EventBus::default();
        let handle = tokio::spawn(NotificationRouter::new(None).run(bus.subscribe()));

        bus.notify(1, "owner@example.org", MediaStatus::Running);
        bus.notify(1, "", MediaStatus::Failed);
        drop(bus);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("router should exit once the bus is gone")
            .expect("router task should not panic");
    }
}
