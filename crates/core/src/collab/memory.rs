use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::collab::persistence::{DialogMetadata, Persistence};
use crate::dialog::Dialog;
use crate::error::{DriveError, DriveResult};
use crate::ids::DialogId;
use crate::records::{HumanQuestion, PendingSubdialogRecord, RunState, SubdialogResponseRecord};

/// Test-grade `Persistence` implementation: an in-process store behind a
/// single `Mutex`. This sits behind the same narrow interface a real
/// YAML/directory-backed persistence layer would implement; it is not meant to survive
/// a process restart.
#[derive(Default)]
pub struct InMemoryPersistence {
    inner: Mutex<Store>,
}

#[derive(Default)]
struct Store {
    dialogs: HashMap<DialogId, Dialog>,
    run_states: HashMap<DialogId, RunState>,
    pending_q4h: HashMap<DialogId, HumanQuestion>,
    pending_subdialogs: HashMap<DialogId, Vec<PendingSubdialogRecord>>,
    response_queues: HashMap<DialogId, Vec<SubdialogResponseRecord>>,
    taken_responses: HashMap<DialogId, Vec<SubdialogResponseRecord>>,
    needs_drive: std::collections::HashSet<Uuid>,
    registered_subdialogs: HashMap<(Uuid, String, String), DialogId>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Store> {
        self.inner.lock().expect("in-memory persistence poisoned")
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn load_dialog_latest(&self, id: DialogId) -> DriveResult<Option<Dialog>> {
        Ok(self.lock().dialogs.get(&id).cloned())
    }

    async fn save_dialog(&self, dialog: &Dialog) -> DriveResult<()> {
        self.lock().dialogs.insert(dialog.id(), dialog.clone());
        Ok(())
    }

    async fn set_dialog_run_state(&self, id: DialogId, state: RunState) -> DriveResult<()> {
        let mut store = self.lock();
        // Dead is terminal: never overwritten once set.
        if let Some(RunState::Dead) = store.run_states.get(&id) {
            return Ok(());
        }
        store.run_states.insert(id, state);
        Ok(())
    }

    async fn load_dialog_run_state(&self, id: DialogId) -> DriveResult<Option<RunState>> {
        Ok(self.lock().run_states.get(&id).cloned())
    }

    async fn append_question4human(&self, owner: DialogId, question: HumanQuestion) -> DriveResult<()> {
        self.lock().pending_q4h.insert(owner, question);
        Ok(())
    }

    async fn load_pending_question4human(&self, owner: DialogId) -> DriveResult<Option<HumanQuestion>> {
        Ok(self.lock().pending_q4h.get(&owner).cloned())
    }

    async fn clear_question4human(&self, owner: DialogId) -> DriveResult<()> {
        self.lock().pending_q4h.remove(&owner);
        Ok(())
    }

    async fn load_pending_subdialogs(&self, owner: DialogId) -> DriveResult<Vec<PendingSubdialogRecord>> {
        Ok(self.lock().pending_subdialogs.get(&owner).cloned().unwrap_or_default())
    }

    async fn save_pending_subdialogs(&self, owner: DialogId, records: Vec<PendingSubdialogRecord>) -> DriveResult<()> {
        self.lock().pending_subdialogs.insert(owner, records);
        Ok(())
    }

    async fn take_subdialog_responses(&self, owner: DialogId) -> DriveResult<Vec<SubdialogResponseRecord>> {
        let mut store = self.lock();
        let taken = store.response_queues.remove(&owner).unwrap_or_default();
        store.taken_responses.insert(owner, taken.clone());
        Ok(taken)
    }

    async fn commit_subdialog_responses(&self, owner: DialogId) -> DriveResult<()> {
        self.lock().taken_responses.remove(&owner);
        Ok(())
    }

    async fn rollback_subdialog_responses(&self, owner: DialogId, records: Vec<SubdialogResponseRecord>) -> DriveResult<()> {
        let mut store = self.lock();
        store.taken_responses.remove(&owner);
        let queue = store.response_queues.entry(owner).or_default();
        let mut restored = records;
        restored.extend(queue.drain(..));
        *queue = restored;
        Ok(())
    }

    async fn append_subdialog_response(&self, owner: DialogId, record: SubdialogResponseRecord) -> DriveResult<()> {
        self.lock().response_queues.entry(owner).or_default().push(record);
        Ok(())
    }

    async fn load_dialog_metadata(&self, id: DialogId) -> DriveResult<Option<DialogMetadata>> {
        let store = self.lock();
        let Some(dialog) = store.dialogs.get(&id) else { return Ok(None) };
        let run_state = store.run_states.get(&id).cloned().unwrap_or(RunState::IdleWaitingUser);
        Ok(Some(DialogMetadata { id, agent_id: dialog.core().agent_id.clone(), run_state }))
    }

    async fn set_needs_drive(&self, root_id: Uuid, flag: bool) -> DriveResult<()> {
        let mut store = self.lock();
        if flag {
            store.needs_drive.insert(root_id);
        } else {
            store.needs_drive.remove(&root_id);
        }
        Ok(())
    }

    async fn needs_drive_set(&self) -> DriveResult<Vec<Uuid>> {
        Ok(self.lock().needs_drive.iter().copied().collect())
    }

    async fn update_subdialog_assignment(&self, id: DialogId, tellask_head: String, tellask_body: String) -> DriveResult<()> {
        let mut store = self.lock();
        match store.dialogs.get_mut(&id) {
            Some(Dialog::Sub { assignment_from_sup, .. }) => {
                assignment_from_sup.tellask_head = tellask_head;
                assignment_from_sup.tellask_body = tellask_body;
                Ok(())
            }
            Some(Dialog::Root { .. }) => Err(DriveError::Internal("cannot assign a root dialog".into())),
            None => Err(DriveError::Persistence(format!("dialog {id} not found"))),
        }
    }

    async fn find_registered_subdialog(&self, root_id: Uuid, target_agent_id: &str, tellask_session: &str) -> DriveResult<Option<DialogId>> {
        let key = (root_id, target_agent_id.to_string(), tellask_session.to_string());
        Ok(self.lock().registered_subdialogs.get(&key).copied())
    }

    async fn register_subdialog(&self, root_id: Uuid, target_agent_id: &str, tellask_session: &str, dialog_id: DialogId) -> DriveResult<()> {
        let key = (root_id, target_agent_id.to_string(), tellask_session.to_string());
        self.lock().registered_subdialogs.insert(key, dialog_id);
        Ok(())
    }
}
