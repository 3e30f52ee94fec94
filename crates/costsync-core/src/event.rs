//! Event bus for costsync using tokio::broadcast
//!
//! Provides a publish-subscribe mechanism for state changes that the live
//! channel and the SSE stream push to clients.

use tokio::sync::broadcast;

/// Totals announced after a project's cost data changed
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectUpdate {
    pub project_name: String,
    pub project_id: String,
    pub element_count: usize,
    pub total_cost: f64,
}

/// Events emitted by the service layer
#[derive(Debug, Clone, PartialEq)]
pub enum DataEvent {
    /// The broker producer connected (true) or was lost (false)
    ProducerStatusChanged(bool),
    /// The document store became reachable (true) or exhausted its retries (false)
    StoreStatusChanged(bool),
    /// A reconciliation run or spreadsheet upload changed a project
    ProjectUpdated(ProjectUpdate),
    /// All cost data of a project was deleted
    ProjectDataDeleted(String),
}

/// Event bus for broadcasting data events
///
/// Uses tokio::broadcast for multi-consumer support.
/// The live channel subscribes for client broadcasts, the web layer for SSE push.
pub struct EventBus {
    sender: broadcast::Sender<DataEvent>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create with default capacity (256 events)
    pub fn default_capacity() -> Self {
        Self::new(256)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: DataEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DataEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::default_capacity()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let bus = EventBus::default_capacity();
        let mut rx = bus.subscribe();

        bus.publish(DataEvent::ProducerStatusChanged(false));
        bus.publish(DataEvent::ProjectDataDeleted("Tower A".to_string()));

        let first = rx.recv().await.unwrap();
        assert_eq!(first, DataEvent::ProducerStatusChanged(false));

        let second = rx.recv().await.unwrap();
        assert!(matches!(second, DataEvent::ProjectDataDeleted(name) if name == "Tower A"));
    }

    #[tokio::test]
    async fn test_cloned_bus_shares_channel() {
        let bus = EventBus::default_capacity();
        let clone = bus.clone();
        let mut rx = bus.subscribe();

        assert_eq!(clone.subscriber_count(), 1);
        clone.publish(DataEvent::StoreStatusChanged(true));

        assert_eq!(rx.recv().await.unwrap(), DataEvent::StoreStatusChanged(true));
    }

    #[test]
    fn test_event_bus_no_subscribers_ok() {
        let bus = EventBus::default_capacity();
        bus.publish(DataEvent::ProducerStatusChanged(true));
    }
}
