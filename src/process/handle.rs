use crate::process::ProcessId;
use std::collections::HashMap;
use std::fmt;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{watch, Mutex as AsyncMutex, OwnedMutexGuard};

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitOutcome {
    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// Outcome used when waiting on the child itself failed
    pub(crate) fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Live side of a spawned process. The child itself is owned by its exit
/// watch task; the handle keeps what is needed to signal it and to observe
/// its exit.
#[derive(Debug)]
pub(crate) struct RuntimeHandle {
    pub pid: u32,
    pub generation: u64,
    pub exited: watch::Receiver<Option<ExitOutcome>>,
}

impl RuntimeHandle {
    pub fn has_exited(&self) -> bool {
        self.exited.borrow().is_some()
    }
}

/// Process id to live handle. Owned by the supervisor; never persisted.
#[derive(Debug, Default)]
pub(crate) struct HandleTable {
    handles: Mutex<HashMap<ProcessId, RuntimeHandle>>,
}

impl HandleTable {
    fn entries(&self) -> MutexGuard<'_, HashMap<ProcessId, RuntimeHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, id: ProcessId, handle: RuntimeHandle) -> Option<RuntimeHandle> {
        self.entries().insert(id, handle)
    }

    pub fn remove(&self, id: ProcessId) -> Option<RuntimeHandle> {
        self.entries().remove(&id)
    }

    pub fn contains(&self, id: ProcessId) -> bool {
        self.entries().contains_key(&id)
    }

    /// True while the handle registered for `id` is the one from `generation`
    pub fn is_current(&self, id: ProcessId, generation: u64) -> bool {
        self.entries()
            .get(&id)
            .is_some_and(|h| h.generation == generation)
    }

    pub fn ids(&self) -> Vec<ProcessId> {
        self.entries().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }
}

/// One async mutex per process id; serializes read-modify-write sequences on
/// the same record
#[derive(Debug, Default)]
pub(crate) struct LockTable {
    locks: Mutex<HashMap<ProcessId, Arc<AsyncMutex<()>>>>,
}

impl LockTable {
    fn slot(&self, id: ProcessId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id).or_default())
    }

    pub async fn lock(&self, id: ProcessId) -> OwnedMutexGuard<()> {
        self.slot(id).lock_owned().await
    }

    /// Take the lock only if no other operation holds it
    pub fn try_lock(&self, id: ProcessId) -> Option<OwnedMutexGuard<()>> {
        self.slot(id).try_lock_owned().ok()
    }

    /// Drop the slot of a deleted record
    pub fn forget(&self, id: ProcessId) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn handle(generation: u64) -> (RuntimeHandle, watch::Sender<Option<ExitOutcome>>) {
        let (tx, rx) = watch::channel(None);
        (
            RuntimeHandle {
                pid: 100,
                generation,
                exited: rx,
            },
            tx,
        )
    }

    #[test]
    fn test_exit_outcome_display() {
        let ok = ExitOutcome {
            code: Some(0),
            signal: None,
        };
        assert!(ok.is_success());
        assert_eq!(ok.to_string(), "code 0");

        let killed = ExitOutcome {
            code: None,
            signal: Some(9),
        };
        assert!(!killed.is_success());
        assert_eq!(killed.to_string(), "signal 9");
        assert_eq!(ExitOutcome::unknown().to_string(), "unknown status");
    }

    #[test]
    fn test_handle_table_generations() {
        let table = HandleTable::default();
        let id = ProcessId::new();
        let (first, _tx1) = handle(1);
        let (second, _tx2) = handle(2);

        table.insert(id, first);
        assert!(table.is_current(id, 1));

        table.insert(id, second);
        assert!(!table.is_current(id, 1));
        assert!(table.is_current(id, 2));

        assert!(table.remove(id).is_some());
        assert!(!table.contains(id));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_handle_has_exited() {
        let (h, tx) = handle(1);
        assert!(!h.has_exited());
        tx.send_replace(Some(ExitOutcome::unknown()));
        assert!(h.has_exited());
    }

    #[tokio::test]
    async fn test_lock_table_serializes_same_id() {
        let locks = LockTable::default();
        let id = ProcessId::new();

        let guard = locks.lock(id).await;
        assert!(locks.try_lock(id).is_none());
        assert!(locks.try_lock(ProcessId::new()).is_some());

        drop(guard);
        assert!(locks.try_lock(id).is_some());
    }

    #[tokio::test]
    async fn test_lock_table_waits_for_holder() {
        let locks = Arc::new(LockTable::default());
        let id = ProcessId::new();
        let guard = locks.lock(id).await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _g = locks.lock(id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
