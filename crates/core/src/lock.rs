use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::ids::DialogKey;

/// Two independent FIFO locks per dialog: the exclusive drive
/// lock, held for one whole `drive()` call, and the suspension-state lock,
/// guarding mutation of pending subdialogs / response queue / Q4H / needs-
/// drive. `tokio::sync::Mutex` queues waiters in arrival order, giving FIFO
/// fairness for free (a map-of-mutexes, not a bare semaphore).
///
/// Entries are created lazily on first access and never removed for the
/// life of the process — dialogs are cheap keys, not something we want to
/// race to evict while a waiter is queued.
#[derive(Default)]
pub struct DialogLockTable {
    drive_locks: StdMutex<HashMap<DialogKey, Arc<Mutex<()>>>>,
    suspension_locks: StdMutex<HashMap<DialogKey, Arc<Mutex<()>>>>,
}

impl DialogLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(table: &StdMutex<HashMap<DialogKey, Arc<Mutex<()>>>>, key: DialogKey) -> Arc<Mutex<()>> {
        let mut guard = table.lock().expect("lock table poisoned");
        guard.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Tries to acquire the drive lock without waiting. `None` means another
    /// drive currently holds it — the caller should either queue
    /// (`wait_in_queue=true`) or fail fast with `ERR_DIALOG_BUSY`.
    pub fn try_acquire_drive(&self, key: DialogKey) -> Option<OwnedMutexGuard<()>> {
        Self::entry(&self.drive_locks, key).try_lock_owned().ok()
    }

    /// Acquires the drive lock, waiting in FIFO order if another drive holds
    /// it.
    pub async fn acquire_drive(&self, key: DialogKey) -> OwnedMutexGuard<()> {
        Self::entry(&self.drive_locks, key).lock_owned().await
    }

    /// Acquires the suspension-state lock for `key`. Must never be called
    /// while already holding another dialog's suspension-state lock.
    pub async fn acquire_suspension(&self, key: DialogKey) -> OwnedMutexGuard<()> {
        Self::entry(&self.suspension_locks, key).lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn key() -> DialogKey {
        let id = Uuid::new_v4();
        DialogKey { root: id, self_id: id }
    }

    #[tokio::test]
    async fn second_try_acquire_fails_while_first_held() {
        let table = DialogLockTable::new();
        let k = key();
        let guard = table.acquire_drive(k).await;
        assert!(table.try_acquire_drive(k).is_none());
        drop(guard);
        assert!(table.try_acquire_drive(k).is_some());
    }

    #[tokio::test]
    async fn distinct_dialogs_do_not_contend() {
        let table = DialogLockTable::new();
        let a = key();
        let b = key();
        let _g1 = table.acquire_drive(a).await;
        assert!(table.try_acquire_drive(b).is_some());
    }
}
