use crate::domain::events::LedgerEvent;
use tokio::sync::broadcast;

/// Fan-out of committed state changes to whoever is listening.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, event: LedgerEvent) {
        tracing::trace!(?event, "ledger event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }
}
