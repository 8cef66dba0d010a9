//! Job status events and the broadcast channel that carries them.
//!
//! The monitor holds an `Arc<EventBus>` and publishes; the
//! [`NotificationRouter`](crate::NotificationRouter) subscribes and delivers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use trackq_core::status::MediaStatus;
use trackq_core::types::DbId;

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// A job reached a new status; its owner should hear about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    /// Job whose status changed.
    pub job_id: DbId,
    /// Owner email. May be empty when the submitter gave none.
    pub recipient: String,
    /// Status the job moved to.
    pub status: MediaStatus,
    /// When the change was published.
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(job_id: DbId, recipient: impl Into<String>, status: MediaStatus) -> Self {
        Self {
            job_id,
            recipient: recipient.into(),
            status,
            timestamp: Utc::now(),
        }
    }

    /// e.g. `"job.running"`.
    pub fn event_type(&self) -> String {
        format!("job.{}", self.status.as_str().to_lowercase())
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Events buffered per subscriber before it starts lagging.
const CHANNEL_CAPACITY: usize = 256;

/// Fan-out of [`JobEvent`]s to every subscriber.
///
/// Publishing never waits and never fails. A subscriber that falls more
/// than the channel capacity behind loses the oldest events.
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Bus whose subscribers each buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            sender: broadcast::channel(capacity).0,
        }
    }

    /// Send `event` to current subscribers; returns how many there were.
    pub fn publish(&self, event: JobEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Tell a job owner about a status change.
    pub fn notify(&self, job_id: DbId, recipient: &str, status: MediaStatus) {
        let delivered_to = self.publish(JobEvent::new(job_id, recipient, status));
        tracing::debug!(job_id, recipient, %status, delivered_to, "Job event published");
    }

    /// Receive events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(CHANNEL_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_carries_job_recipient_and_status() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.notify(42, "owner@example.org", MediaStatus::Success);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_id, 42);
        assert_eq!(event.recipient, "owner@example.org");
        assert_eq!(event.status, MediaStatus::Success);
        assert_eq!(event.event_type(), "job.success");
    }

    #[test]
    fn publish_counts_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(JobEvent::new(1, "", MediaStatus::Failed)), 0);

        let _a = bus.subscribe();
        let _b = bus.subscribe();
        assert_eq!(bus.publish(JobEvent::new(1, "", MediaStatus::Running)), 2);
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();

        for job_id in 1..=3 {
            bus.notify(job_id, "", MediaStatus::Queued);
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
        assert_eq!(rx.recv().await.unwrap().job_id, 2);
    }

    #[test]
    fn status_serializes_by_name() {
        let event = JobEvent::new(3, "x@example.org", MediaStatus::Failed);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "FAILED");
        assert_eq!(json["job_id"], 3);
    }
}
