use async_trait::async_trait;

use crate::events::DialogEvent;
use crate::ids::DialogId;

/// Event bus collaborator: `postDialogEvent(dlg, evt)`. The production
/// implementation in `dominds-runtime` wraps a
/// `tokio::sync::broadcast::Sender<DialogEvent>`.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn post_dialog_event(&self, dialog_id: DialogId, event: DialogEvent);
}
