//! Process-wide event bus for committed domain events.

use crate::domain::DomainEvent;
use tokio::sync::broadcast;

/// Broadcast bus. Events are only published after the originating
/// transaction commits; subscribers never see rolled-back work.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        EventBus { sender }
    }

    /// Publish an event. A bus with no subscribers drops it silently.
    pub fn publish(&self, event: DomainEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new(256)
    }
}
