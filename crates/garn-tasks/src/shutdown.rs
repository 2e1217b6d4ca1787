//! Cleanup on interrupt
//!
//! Tasks with `onDone` hooks register here when they start. If the process is
//! interrupted the entrypoint drains the registry and runs those hooks once.

use std::sync::{Mutex, PoisonError};

use crate::task::{Hook, TaskId};

/// A started task whose `onDone` hooks must run on interrupt
#[derive(Debug, Clone)]
pub struct ShutdownEntry {
    pub task: TaskId,
    pub hooks: Vec<Hook>,
}

/// Tasks to clean up on interrupt, in start order
#[derive(Debug, Default)]
pub struct ShutdownRegistry {
    entries: Mutex<Vec<ShutdownEntry>>,
}

impl ShutdownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a started task. Tasks without hooks and repeated
    /// registrations are ignored.
    pub fn register(&self, task: &TaskId, hooks: &[Hook]) {
        if hooks.is_empty() {
            return;
        }
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.iter().any(|e| &e.task == task) {
            return;
        }
        entries.push(ShutdownEntry {
            task: task.clone(),
            hooks: hooks.to_vec(),
        });
    }

    /// Take every registered entry; later calls see only new registrations
    pub fn drain(&self) -> Vec<ShutdownEntry> {
        std::mem::take(&mut *self.entries.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
