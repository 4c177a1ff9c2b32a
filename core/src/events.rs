use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Notifications emitted by the synchronization engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A new activation started for `room_id`.
    Activated { room_id: String, generation: u64 },
    /// The merged view of the current activation was replaced.
    ViewChanged {
        room_id: String,
        generation: u64,
        len: usize,
    },
    /// Older history is exhausted for the current activation.
    PaginationExhausted { room_id: String, generation: u64 },
}

/// Fan-out of engine events. Receivers that were dropped are pruned on the
/// next publish.
pub struct EventBus {
    subscribers: Vec<UnboundedSender<SyncEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> UnboundedReceiver<SyncEvent> {
        let (tx, rx) = unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn publish(&mut self, event: SyncEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
