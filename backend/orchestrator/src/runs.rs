//! Background-task slot keyed by run epoch.
//!
//! A flow bumps its epoch when it claims a run and again on reset. The task
//! spawned for a run is parked here with that epoch, so a task stored late
//! never displaces a newer run and a reset only aborts runs it superseded.

use std::sync::{Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Default)]
pub struct RunSlot {
    task: Mutex<Option<(u64, JoinHandle<()>)>>,
}

impl RunSlot {
    /// Park the task spawned for `epoch`.
    ///
    /// `current` reads the flow's epoch under the slot lock. If the run was
    /// already superseded the new task is aborted instead and `false` is
    /// returned.
    pub fn install(&self, epoch: u64, current: impl FnOnce() -> u64, handle: JoinHandle<()>) -> bool {
        let mut slot = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if current() != epoch {
            debug!("Run {epoch} was superseded before its task was stored");
            handle.abort();
            return false;
        }
        if let Some((previous, task)) = slot.replace((epoch, handle)) {
            debug!("Aborting task of run {previous}");
            task.abort();
        }
        true
    }

    /// Abort the parked task if it belongs to `epoch` or an older run.
    pub fn abort_through(&self, epoch: u64) {
        let mut slot = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(slot.as_ref(), Some((stored, _)) if *stored <= epoch) {
            if let Some((_, task)) = slot.take() {
                task.abort();
            }
        }
    }
}
