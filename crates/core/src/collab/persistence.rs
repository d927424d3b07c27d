use async_trait::async_trait;
use uuid::Uuid;

use crate::dialog::Dialog;
use crate::error::DriveResult;
use crate::ids::DialogId;
use crate::records::{HumanQuestion, PendingSubdialogRecord, RunState, SubdialogResponseRecord};

/// Pure I/O facade the driver never implements itself. All
/// mutating calls are idempotent at the record key (responseId, subdialogId,
/// questionId) so a crash-and-retry never double-applies a write.
///
/// `#[async_trait]` object-safe trait so the driver can hold it as
/// `Arc<dyn Persistence>`.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn load_dialog_latest(&self, id: DialogId) -> DriveResult<Option<Dialog>>;
    async fn save_dialog(&self, dialog: &Dialog) -> DriveResult<()>;
    async fn set_dialog_run_state(&self, id: DialogId, state: RunState) -> DriveResult<()>;
    async fn load_dialog_run_state(&self, id: DialogId) -> DriveResult<Option<RunState>>;

    async fn append_question4human(&self, owner: DialogId, question: HumanQuestion) -> DriveResult<()>;
    async fn load_pending_question4human(&self, owner: DialogId) -> DriveResult<Option<HumanQuestion>>;
    async fn clear_question4human(&self, owner: DialogId) -> DriveResult<()>;

    async fn load_pending_subdialogs(&self, owner: DialogId) -> DriveResult<Vec<PendingSubdialogRecord>>;
    async fn save_pending_subdialogs(&self, owner: DialogId, records: Vec<PendingSubdialogRecord>) -> DriveResult<()>;

    /// Atomically removes the response queue for `owner` and returns it,
    /// leaving a "taken" marker so a concurrent revival doesn't double-take.
    /// Call `commit_subdialog_responses` on success or
    /// `rollback_subdialog_responses` on generation error.
    async fn take_subdialog_responses(&self, owner: DialogId) -> DriveResult<Vec<SubdialogResponseRecord>>;
    async fn commit_subdialog_responses(&self, owner: DialogId) -> DriveResult<()>;
    async fn rollback_subdialog_responses(&self, owner: DialogId, records: Vec<SubdialogResponseRecord>) -> DriveResult<()>;
    async fn append_subdialog_response(&self, owner: DialogId, record: SubdialogResponseRecord) -> DriveResult<()>;

    async fn load_dialog_metadata(&self, id: DialogId) -> DriveResult<Option<DialogMetadata>>;
    async fn set_needs_drive(&self, root_id: Uuid, flag: bool) -> DriveResult<()>;
    async fn needs_drive_set(&self) -> DriveResult<Vec<Uuid>>;

    async fn update_subdialog_assignment(&self, id: DialogId, tellask_head: String, tellask_body: String) -> DriveResult<()>;

    /// Looks up a previously registered (Type B) subdialog by the pair the
    /// tellask headline carries: the target agent and the `!tellaskSession`
    /// directive.
    async fn find_registered_subdialog(&self, root_id: Uuid, target_agent_id: &str, tellask_session: &str) -> DriveResult<Option<DialogId>>;
    async fn register_subdialog(&self, root_id: Uuid, target_agent_id: &str, tellask_session: &str, dialog_id: DialogId) -> DriveResult<()>;
}

/// Lightweight metadata about a dialog, cheaper to fetch than the full
/// message history when the caller only needs agent id / run state.
#[derive(Debug, Clone)]
pub struct DialogMetadata {
    pub id: DialogId,
    pub agent_id: String,
    pub run_state: RunState,
}
