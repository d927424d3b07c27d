//! Backend driver: a long-lived task that wakes root dialogs
//! flagged "needs-drive", drives each to suspension, then re-evaluates the
//! flag once the drive lock is released.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dominds_config::LlmProvidersConfig;
use dominds_core::collab::agent::AgentLoader;
use dominds_core::collab::event_bus::EventBus;
use dominds_core::collab::llm::LlmGenerator;
use dominds_core::collab::persistence::Persistence;
use dominds_core::collab::tools::ToolRegistry;
use dominds_core::error::DriveResult;
use dominds_core::ids::DialogId;
use dominds_core::lock::DialogLockTable;
use dominds_core::records::RunState;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::generation;
use crate::health::ContextHealthFsm;

/// Every collaborator the driver needs, bundled so `drive()` and the
/// tellask executor can be handed one cheaply-cloneable value instead of a
/// long parameter list. Each field is already the `Arc<dyn Trait>` the
/// caller constructed at startup.
pub struct DriverContext {
    pub persistence: Arc<dyn Persistence>,
    pub event_bus: Arc<dyn EventBus>,
    pub locks: Arc<DialogLockTable>,
    pub agent_loader: Arc<dyn AgentLoader>,
    pub generator: Arc<dyn LlmGenerator>,
    pub tools: Arc<ToolRegistry>,
    pub models: Arc<LlmProvidersConfig>,
    pub problem_sink: Arc<dyn dominds_llm::ProblemSink>,
    pub minds_dir: std::path::PathBuf,
    pub max_retries: u32,
    /// Context-health remediation state, one entry per dialog, surviving
    /// across separate `drive()` invocations for the same dialog (subdialog
    /// re-drives, Q4H/subdialog-response revivals).
    pub health_fsms: Mutex<HashMap<DialogId, ContextHealthFsm>>,
}

impl DriverContext {
    /// Takes this dialog's remediation state, leaving a default entry
    /// behind — the caller puts its (possibly updated) FSM back with
    /// `store_health_fsm` once the iteration finishes.
    pub async fn take_health_fsm(&self, dialog_id: DialogId) -> ContextHealthFsm {
        self.health_fsms.lock().await.entry(dialog_id).or_default().clone()
    }

    pub async fn store_health_fsm(&self, dialog_id: DialogId, fsm: ContextHealthFsm) {
        self.health_fsms.lock().await.insert(dialog_id, fsm);
    }
}

/// Whether `dialog_id` is eligible to be driven right now:
/// not dead, no pending Q4H, no pending subdialogs still awaiting a reply.
pub async fn can_drive(ctx: &DriverContext, dialog_id: DialogId) -> DriveResult<bool> {
    if let Some(RunState::Dead) = ctx.persistence.load_dialog_run_state(dialog_id).await? {
        return Ok(false);
    }
    if ctx.persistence.load_pending_question4human(dialog_id).await?.is_some() {
        return Ok(false);
    }
    if !ctx.persistence.load_pending_subdialogs(dialog_id).await?.is_empty() {
        return Ok(false);
    }
    Ok(true)
}

pub struct BackendDriver {
    ctx: Arc<DriverContext>,
}

impl BackendDriver {
    pub fn new(ctx: Arc<DriverContext>) -> Self {
        Self { ctx }
    }

    /// Runs one pass over the needs-drive set, returning how many root
    /// dialogs were found (driven or skipped).
    pub async fn run_once(&self) -> DriveResult<usize> {
        let roots = self.ctx.persistence.needs_drive_set().await?;
        for root in &roots {
            let dialog_id = DialogId { self_id: *root, root_id: *root };
            if !can_drive(&self.ctx, dialog_id).await? {
                continue;
            }
            let _guard = self.ctx.locks.acquire_drive(dialog_id.key()).await;
            if let Err(e) = generation::drive(self.ctx.clone(), dialog_id, None, false).await {
                error!(dialog = %dialog_id, error = %e, "generation loop returned an error");
            }
            drop(_guard);

            // needs-drive is re-evaluated strictly after the
            // drive lock is released, never from inside drive() itself.
            let still_needs_drive = !can_drive(&self.ctx, dialog_id).await?;
            self.ctx.persistence.set_needs_drive(*root, still_needs_drive).await?;
        }
        Ok(roots.len())
    }

    /// Runs the backend driver loop until `cancel` fires: 100ms idle sleep
    /// when the needs-drive set was empty, 1s sleep after a loop-level
    /// error.
    pub async fn run_forever(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            match self.run_once().await {
                Ok(0) => {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                        _ = cancel.cancelled() => return,
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "backend driver pass failed");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                        _ = cancel.cancelled() => return,
                    }
                }
            }
        }
    }
}

/// Owns the collaborators and exposes the driver as a single constructible
/// unit for an embedding application.
pub struct DriverRuntime {
    pub ctx: Arc<DriverContext>,
}

impl DriverRuntime {
    pub fn new(ctx: DriverContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub fn backend_driver(&self) -> BackendDriver {
        BackendDriver::new(self.ctx.clone())
    }

    /// Drives a single dialog directly, bypassing the needs-drive polling
    /// loop — used for an initial user-prompted drive: a fresh
    /// root dialog's first drive is caller-initiated, not discovered. Waits
    /// for the drive lock if another drive currently holds it.
    pub async fn drive_now(&self, dialog_id: DialogId, prompt: Option<dominds_core::message::ChatMessage>) -> DriveResult<()> {
        self.drive_with_options(dialog_id, prompt, true).await
    }

    /// Drives a single dialog directly. `wait_in_queue = false` fails fast
    /// with `DriveError::Busy` instead of waiting if another drive already
    /// holds this dialog's exclusive lock.
    pub async fn drive_with_options(
        &self,
        dialog_id: DialogId,
        prompt: Option<dominds_core::message::ChatMessage>,
        wait_in_queue: bool,
    ) -> DriveResult<()> {
        let _guard = if wait_in_queue {
            self.ctx.locks.acquire_drive(dialog_id.key()).await
        } else {
            self.ctx.locks.try_acquire_drive(dialog_id.key()).ok_or(dominds_core::error::DriveError::Busy)?
        };
        generation::drive(self.ctx.clone(), dialog_id, prompt, false).await?;
        drop(_guard);
        if !can_drive(&self.ctx, dialog_id).await? {
            return Ok(());
        }
        if dialog_id.is_root() {
            self.ctx.persistence.set_needs_drive(dialog_id.root_id, false).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dominds_config::FileAgentLoader;
    use dominds_core::collab::memory::InMemoryPersistence;
    use dominds_core::dialog::Dialog;
    use dominds_core::ids::DialogId;
    use dominds_llm::EchoGenerator;

    struct NoopEventBus;
    #[async_trait::async_trait]
    impl EventBus for NoopEventBus {
        async fn post_dialog_event(&self, _dialog_id: DialogId, _event: dominds_core::events::DialogEvent) {}
    }

    fn ctx(minds_dir: std::path::PathBuf) -> Arc<DriverContext> {
        Arc::new(DriverContext {
            persistence: Arc::new(InMemoryPersistence::new()),
            event_bus: Arc::new(NoopEventBus),
            locks: Arc::new(DialogLockTable::new()),
            agent_loader: Arc::new(FileAgentLoader::new(minds_dir.clone())),
            generator: Arc::new(EchoGenerator { text: "done".to_string() }),
            tools: Arc::new(ToolRegistry::new()),
            models: Arc::new(LlmProvidersConfig::default()),
            problem_sink: Arc::new(dominds_llm::problem::InMemoryProblemSink::new()),
            minds_dir,
            max_retries: 2,
            health_fsms: Mutex::new(HashMap::new()),
        })
    }

    #[tokio::test]
    async fn empty_needs_drive_set_is_a_noop_pass() {
        let dir = tempfile::tempdir().unwrap();
        let driver = BackendDriver::new(ctx(dir.path().to_path_buf()));
        assert_eq!(driver.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dead_dialog_cannot_be_driven() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path().to_path_buf());
        let id = DialogId::new_root();
        c.persistence.save_dialog(&Dialog::new_root(id, "alice", 3)).await.unwrap();
        c.persistence.set_dialog_run_state(id, RunState::Dead).await.unwrap();
        assert!(!can_drive(&c, id).await.unwrap());
    }

    #[tokio::test]
    async fn non_waiting_drive_fails_fast_when_already_busy() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path().to_path_buf());
        let id = DialogId::new_root();
        c.persistence.save_dialog(&Dialog::new_root(id, "alice", 3)).await.unwrap();
        let runtime = DriverRuntime { ctx: c.clone() };

        let held = c.locks.acquire_drive(id.key()).await;
        let result = runtime.drive_with_options(id, None, false).await;
        assert!(matches!(result, Err(dominds_core::error::DriveError::Busy)));
        drop(held);
    }
}
