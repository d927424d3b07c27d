//! Broadcast-backed `EventBus`: the production implementation the
//! driver doc comment promises, wrapping a `tokio::sync::broadcast::Sender`
//! so any number of UI/log subscribers can `subscribe()` independently.

use async_trait::async_trait;
use dominds_core::collab::event_bus::EventBus;
use dominds_core::events::DialogEvent;
use dominds_core::ids::DialogId;
use tokio::sync::broadcast;
use tracing::trace;

/// One event posted to the bus, tagged with the dialog it came from so a
/// subscriber watching many dialogs can filter.
#[derive(Debug, Clone)]
pub struct DialogEventEnvelope {
    pub dialog_id: DialogId,
    pub event: DialogEvent,
}

pub struct BroadcastEventBus {
    sender: broadcast::Sender<DialogEventEnvelope>,
}

impl BroadcastEventBus {
    /// `capacity` bounds how many unconsumed events a lagging subscriber can
    /// fall behind before `broadcast::Sender` starts dropping the oldest.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DialogEventEnvelope> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn post_dialog_event(&self, dialog_id: DialogId, event: DialogEvent) {
        // No receivers is the common case when nothing is watching the UI
        // transport yet; that's not a failure, just a dropped broadcast.
        if self.sender.send(DialogEventEnvelope { dialog_id, event }).is_err() {
            trace!(dialog = %dialog_id, "posted dialog event with no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dominds_core::ids::DialogId;

    #[tokio::test]
    async fn subscriber_receives_posted_event() {
        let bus = BroadcastEventBus::new(16);
        let mut rx = bus.subscribe();
        let dialog_id = DialogId::new_root();
        bus.post_dialog_event(dialog_id, DialogEvent::Resumed).await;
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.dialog_id, dialog_id);
        assert!(matches!(envelope.event, DialogEvent::Resumed));
    }

    #[tokio::test]
    async fn posting_with_no_subscribers_does_not_panic_or_error() {
        let bus = BroadcastEventBus::new(16);
        bus.post_dialog_event(DialogId::new_root(), DialogEvent::Resumed).await;
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_their_own_copy() {
        let bus = BroadcastEventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        let dialog_id = DialogId::new_root();
        bus.post_dialog_event(dialog_id, DialogEvent::Resumed).await;
        assert!(matches!(rx1.recv().await.unwrap().event, DialogEvent::Resumed));
        assert!(matches!(rx2.recv().await.unwrap().event, DialogEvent::Resumed));
    }
}
