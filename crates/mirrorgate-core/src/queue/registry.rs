//! Task registry: live task handles plus the running/queued tables.
//!
//! Design:
//! - `entries` is the single source of truth for which tasks exist.
//! - The four tables hold `TaskId`s only (queued tables add the signal).
//! - Every mutation updates `entries` and the tables under one guard, so a
//!   registered id is always in exactly one of the four tables.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::ResumeSignal;
use crate::config::QueueSettings;
use crate::domain::{TaskId, TaskKind, UserId};
use crate::observability::QueueCounts;
use crate::ports::TransferTask;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("task {0} is already registered")]
    AlreadyRegistered(TaskId),

    #[error("task {0} is not registered")]
    NotRegistered(TaskId),

    #[error("task {0} is not in the download phase")]
    NotDownloading(TaskId),
}

/// Where `register`/`begin_upload` placed a task.
#[derive(Debug, Clone)]
pub enum Slot {
    Running,
    /// Wait on the signal before starting I/O.
    Queued(ResumeSignal),
}

impl Slot {
    pub fn is_running(&self) -> bool {
        matches!(self, Slot::Running)
    }
}

/// Resource that made the queue controller displace a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pressure {
    Cpu,
    Memory,
}

impl Pressure {
    pub fn label(self) -> &'static str {
        match self {
            Pressure::Cpu => "high CPU usage",
            Pressure::Memory => "high memory usage",
        }
    }
}

/// Table membership of one registered task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Running(TaskKind),
    Queued(TaskKind),
}

impl Placement {
    pub fn kind(self) -> TaskKind {
        match self {
            Placement::Running(kind) | Placement::Queued(kind) => kind,
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, Placement::Running(_))
    }
}

/// Copy of one entry taken under the guard; probes run on it afterwards.
#[derive(Clone)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub task: Arc<dyn TransferTask>,
    pub placement: Placement,
    pub displaced: Option<Pressure>,
    pub cancel_requested: bool,
}

struct Entry {
    task: Arc<dyn TransferTask>,
    kind: TaskKind,
    /// Registration order, used for FIFO promotion.
    seq: u64,
    cancel_requested: bool,
    displaced: Option<Pressure>,
}

#[derive(Default)]
struct Tables {
    running: HashSet<TaskId>,
    queued: HashMap<TaskId, ResumeSignal>,
}

struct RegistryState {
    entries: HashMap<TaskId, Entry>,
    download: Tables,
    upload: Tables,
    next_seq: u64,
    slots: QueueSettings,
}

impl RegistryState {
    fn new(slots: QueueSettings) -> Self {
        Self {
            entries: HashMap::new(),
            download: Tables::default(),
            upload: Tables::default(),
            next_seq: 1,
            slots,
        }
    }

    fn tables(&self, kind: TaskKind) -> &Tables {
        match kind {
            TaskKind::Download => &self.download,
            TaskKind::Upload => &self.upload,
        }
    }

    fn tables_mut(&mut self, kind: TaskKind) -> &mut Tables {
        match kind {
            TaskKind::Download => &mut self.download,
            TaskKind::Upload => &mut self.upload,
        }
    }

    fn has_slot(&self, kind: TaskKind) -> bool {
        let running_total = self.download.running.len() + self.upload.running.len();
        if self.slots.all > 0 && running_total >= self.slots.all {
            return false;
        }
        let cap = match kind {
            TaskKind::Download => self.slots.download,
            TaskKind::Upload => self.slots.upload,
        };
        cap == 0 || self.tables(kind).running.len() < cap
    }

    /// Put `id` into the running table if a slot is free, else queue it.
    fn place(&mut self, id: TaskId, kind: TaskKind) -> Slot {
        if self.has_slot(kind) {
            self.tables_mut(kind).running.insert(id);
            Slot::Running
        } else {
            let signal = ResumeSignal::new();
            self.tables_mut(kind).queued.insert(id, signal.clone());
            Slot::Queued(signal)
        }
    }

    /// Remove `id` from whichever table holds it; fires a pending signal so
    /// the waiter wakes up and notices the change.
    fn detach(&mut self, id: TaskId, kind: TaskKind) {
        let tables = self.tables_mut(kind);
        tables.running.remove(&id);
        if let Some(signal) = tables.queued.remove(&id) {
            signal.fire();
        }
    }

    fn placement(&self, id: TaskId) -> Option<Placement> {
        let entry = self.entries.get(&id)?;
        let tables = self.tables(entry.kind);
        if tables.running.contains(&id) {
            Some(Placement::Running(entry.kind))
        } else if tables.queued.contains_key(&id) {
            Some(Placement::Queued(entry.kind))
        } else {
            None
        }
    }

    /// Start capacity-queued tasks, oldest first, while slots are free.
    /// Pressure-displaced tasks are left for the queue controller.
    fn promote(&mut self) -> Vec<TaskId> {
        let mut candidates: Vec<(u64, TaskId, TaskKind)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.displaced.is_none())
            .filter(|(id, e)| self.tables(e.kind).queued.contains_key(id))
            .map(|(id, e)| (e.seq, *id, e.kind))
            .collect();
        candidates.sort_by_key(|(seq, _, _)| *seq);

        let mut promoted = Vec::new();
        for (_, id, kind) in candidates {
            if !self.has_slot(kind) {
                continue;
            }
            let tables = self.tables_mut(kind);
            if let Some(signal) = tables.queued.remove(&id) {
                tables.running.insert(id);
                signal.fire();
                promoted.push(id);
            }
        }
        promoted
    }

    fn counts(&self) -> QueueCounts {
        QueueCounts {
            registered: self.entries.len(),
            running_download: self.download.running.len(),
            queued_download: self.download.queued.len(),
            running_upload: self.upload.running.len(),
            queued_upload: self.upload.queued.len(),
            displaced: self
                .entries
                .values()
                .filter(|e| e.displaced.is_some())
                .count(),
            warned: 0,
        }
    }
}

/// Shared registry. All access goes through its methods; the tables are
/// never handed out.
pub struct TaskRegistry {
    state: Mutex<RegistryState>,
}

impl TaskRegistry {
    pub fn new(slots: QueueSettings) -> Self {
        Self {
            state: Mutex::new(RegistryState::new(slots)),
        }
    }

    /// Register a freshly admitted task.
    pub async fn register(&self, task: Arc<dyn TransferTask>) -> Result<Slot, RegistryError> {
        let id = task.id();
        let kind = task.kind();
        let mut state = self.state.lock().await;
        if state.entries.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            id,
            Entry {
                task,
                kind,
                seq,
                cancel_requested: false,
                displaced: None,
            },
        );
        let slot = state.place(id, kind);
        debug!(task = %id, %kind, running = slot.is_running(), "task registered");
        Ok(slot)
    }

    /// Remove a task from every table and hand its slot to the next waiter.
    /// Returns false if the task was not registered.
    pub async fn unregister(&self, id: TaskId) -> bool {
        let promoted = {
            let mut state = self.state.lock().await;
            let Some(entry) = state.entries.remove(&id) else {
                return false;
            };
            state.detach(id, entry.kind);
            state.promote()
        };
        debug!(task = %id, promoted = promoted.len(), "task unregistered");
        for next in promoted {
            info!(task = %next, "queued task started");
        }
        true
    }

    /// Move a download-phase task into the upload tables.
    pub async fn begin_upload(&self, id: TaskId) -> Result<Slot, RegistryError> {
        let (slot, promoted) = {
            let mut state = self.state.lock().await;
            let kind = state
                .entries
                .get(&id)
                .map(|e| e.kind)
                .ok_or(RegistryError::NotRegistered(id))?;
            if kind != TaskKind::Download {
                return Err(RegistryError::NotDownloading(id));
            }
            state.detach(id, TaskKind::Download);
            if let Some(entry) = state.entries.get_mut(&id) {
                entry.kind = TaskKind::Upload;
                entry.displaced = None;
            }
            let slot = state.place(id, TaskKind::Upload);
            (slot, state.promote())
        };
        debug!(task = %id, running = slot.is_running(), promoted = promoted.len(), "task entered upload phase");
        Ok(slot)
    }

    /// Block while the task sits in a queued table. Returns immediately when
    /// it is running or no longer registered.
    pub async fn wait_until_runnable(&self, id: TaskId) {
        loop {
            let signal = {
                let state = self.state.lock().await;
                let Some(entry) = state.entries.get(&id) else {
                    return;
                };
                match state.tables(entry.kind).queued.get(&id) {
                    Some(signal) => signal.clone(),
                    None => return,
                }
            };
            signal.wait().await;
        }
    }

    pub async fn contains(&self, id: TaskId) -> bool {
        self.state.lock().await.entries.contains_key(&id)
    }

    pub async fn placement(&self, id: TaskId) -> Option<Placement> {
        self.state.lock().await.placement(id)
    }

    /// Consistent copy of every registered task.
    pub async fn snapshot(&self) -> Vec<TaskSnapshot> {
        let state = self.state.lock().await;
        state
            .entries
            .iter()
            .filter_map(|(id, entry)| {
                let placement = state.placement(*id)?;
                Some(TaskSnapshot {
                    id: *id,
                    task: Arc::clone(&entry.task),
                    placement,
                    displaced: entry.displaced,
                    cancel_requested: entry.cancel_requested,
                })
            })
            .collect()
    }

    /// (tasks owned by `user`, all tasks) currently registered.
    pub async fn active_counts(&self, user: UserId) -> (usize, usize) {
        let state = self.state.lock().await;
        let owned = state
            .entries
            .values()
            .filter(|e| e.task.owner() == user)
            .count();
        (owned, state.entries.len())
    }

    /// Mark the task as being cancelled. Both sweeps skip it from then on and
    /// engines without a cancel capability poll the flag.
    pub async fn request_cancel(&self, id: TaskId) -> bool {
        let mut state = self.state.lock().await;
        match state.entries.get_mut(&id) {
            Some(entry) => {
                entry.cancel_requested = true;
                true
            }
            None => false,
        }
    }

    pub async fn is_cancel_requested(&self, id: TaskId) -> bool {
        let state = self.state.lock().await;
        state
            .entries
            .get(&id)
            .is_some_and(|e| e.cancel_requested)
    }

    /// Move a running task into its queued table because of `pressure`.
    ///
    /// Installs a fresh unset signal. The freed slot is not handed to another
    /// task. Returns false when the task is gone or not running.
    pub async fn displace(&self, id: TaskId, pressure: Pressure) -> bool {
        let mut state = self.state.lock().await;
        let Some(kind) = state.entries.get(&id).map(|e| e.kind) else {
            return false;
        };
        let tables = state.tables_mut(kind);
        if !tables.running.remove(&id) {
            return false;
        }
        tables.queued.insert(id, ResumeSignal::new());
        if let Some(entry) = state.entries.get_mut(&id) {
            entry.displaced = Some(pressure);
        }
        true
    }

    /// Move a task displaced for `pressure` back to running and fire its
    /// signal. Returns false when the task is gone or was not displaced for
    /// that reason.
    pub async fn resume(&self, id: TaskId, pressure: Pressure) -> bool {
        let mut state = self.state.lock().await;
        let Some(entry) = state.entries.get_mut(&id) else {
            return false;
        };
        if entry.displaced != Some(pressure) {
            return false;
        }
        entry.displaced = None;
        let kind = entry.kind;
        let tables = state.tables_mut(kind);
        match tables.queued.remove(&id) {
            Some(signal) => {
                tables.running.insert(id);
                signal.fire();
                true
            }
            None => false,
        }
    }

    /// Tasks currently displaced for `pressure`.
    pub async fn displaced(&self, pressure: Pressure) -> Vec<TaskId> {
        let state = self.state.lock().await;
        state
            .entries
            .iter()
            .filter(|(_, e)| e.displaced == Some(pressure))
            .map(|(id, _)| *id)
            .collect()
    }

    pub async fn counts(&self) -> QueueCounts {
        self.state.lock().await.counts()
    }
}
