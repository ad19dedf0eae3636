//! Fakes shared by the unit tests.

use std::collections::HashSet;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::backend::{BackendError, BackendTransfer, Throughput, TransferBackend};
use crate::domain::{Category, MessageId, TaskId, TaskKind, TaskStatus, UserId};
use crate::error::NotifyError;
use crate::ports::{CancelAck, ManualClock, Notifier, ResourceSample, SystemProbe, TransferTask};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub(crate) fn clock_at_noon() -> ManualClock {
    ManualClock::new(noon())
}

#[derive(Debug, Clone)]
struct Probes {
    status: Option<TaskStatus>,
    speed: Option<u64>,
    eta: Option<Duration>,
    size: Option<u64>,
    processed: Option<u64>,
    started_at: DateTime<Utc>,
}

/// Task whose probes are set by the test.
pub(crate) struct FakeTask {
    id: TaskId,
    kind: TaskKind,
    owner: UserId,
    probes: Mutex<Probes>,
    cancellable: AtomicBool,
    cancels: AtomicU32,
}

impl FakeTask {
    fn new(kind: TaskKind, owner: i64, status: TaskStatus) -> Arc<Self> {
        Arc::new(Self {
            id: TaskId::generate(),
            kind,
            owner: UserId::new(owner),
            probes: Mutex::new(Probes {
                status: Some(status),
                speed: None,
                eta: None,
                size: None,
                processed: None,
                started_at: noon(),
            }),
            cancellable: AtomicBool::new(true),
            cancels: AtomicU32::new(0),
        })
    }

    pub fn download(owner: i64) -> Arc<Self> {
        Self::new(TaskKind::Download, owner, TaskStatus::Downloading)
    }

    pub fn upload(owner: i64) -> Arc<Self> {
        Self::new(TaskKind::Upload, owner, TaskStatus::Uploading)
    }

    pub fn set_status(&self, status: Option<TaskStatus>) {
        lock(&self.probes).status = status;
    }

    pub fn set_speed(&self, speed: Option<u64>) {
        lock(&self.probes).speed = speed;
    }

    pub fn set_eta(&self, eta: Option<Duration>) {
        lock(&self.probes).eta = eta;
    }

    pub fn set_size(&self, size: Option<u64>) {
        lock(&self.probes).size = size;
    }

    pub fn set_processed(&self, processed: Option<u64>) {
        lock(&self.probes).processed = processed;
    }

    pub fn set_started_at(&self, at: DateTime<Utc>) {
        lock(&self.probes).started_at = at;
    }

    pub fn set_cancellable(&self, cancellable: bool) {
        self.cancellable.store(cancellable, Ordering::SeqCst);
    }

    pub fn cancel_calls(&self) -> u32 {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransferTask for FakeTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn kind(&self) -> TaskKind {
        self.kind
    }

    fn category(&self) -> Category {
        Category::Torrent
    }

    fn owner(&self) -> UserId {
        self.owner
    }

    fn started_at(&self) -> DateTime<Utc> {
        lock(&self.probes).started_at
    }

    async fn status(&self) -> Option<TaskStatus> {
        lock(&self.probes).status
    }

    async fn speed(&self) -> Option<u64> {
        lock(&self.probes).speed
    }

    async fn eta(&self) -> Option<Duration> {
        lock(&self.probes).eta
    }

    async fn size(&self) -> Option<u64> {
        lock(&self.probes).size
    }

    async fn processed_bytes(&self) -> Option<u64> {
        lock(&self.probes).processed
    }

    async fn cancel(&self) -> CancelAck {
        if self.cancellable.load(Ordering::SeqCst) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            CancelAck::Requested
        } else {
            CancelAck::Unsupported
        }
    }
}

/// Notifier that keeps every message it was asked to send.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    sent: Mutex<Vec<(UserId, String)>>,
    expiring: Mutex<Vec<(MessageId, Duration)>>,
    unavailable: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(UserId, String)> {
        lock(&self.sent).clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, text)| text).collect()
    }

    pub fn count(&self) -> usize {
        lock(&self.sent).len()
    }

    pub fn expiring(&self) -> Vec<(MessageId, Duration)> {
        lock(&self.expiring).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, owner: UserId, text: &str) -> Result<MessageId, NotifyError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(NotifyError::Unavailable("test chat is down".into()));
        }
        lock(&self.sent).push((owner, text.to_string()));
        Ok(MessageId::generate())
    }

    async fn schedule_auto_delete(&self, message: MessageId, after: Duration) {
        lock(&self.expiring).push((message, after));
    }
}

/// Probe returning whatever the test set last.
pub(crate) struct FixedProbe {
    sample: Mutex<ResourceSample>,
    free: AtomicU64,
    disk_error: AtomicBool,
}

impl FixedProbe {
    pub fn new(cpu_percent: f32, memory_percent: f32, free: u64) -> Self {
        Self {
            sample: Mutex::new(ResourceSample {
                cpu_percent,
                memory_percent,
            }),
            free: AtomicU64::new(free),
            disk_error: AtomicBool::new(false),
        }
    }

    pub fn set_sample(&self, cpu_percent: f32, memory_percent: f32) {
        *lock(&self.sample) = ResourceSample {
            cpu_percent,
            memory_percent,
        };
    }

    pub fn set_free_space(&self, free: u64) {
        self.free.store(free, Ordering::SeqCst);
    }

    pub fn set_disk_error(&self, failing: bool) {
        self.disk_error.store(failing, Ordering::SeqCst);
    }
}

impl SystemProbe for FixedProbe {
    fn sample(&self) -> ResourceSample {
        *lock(&self.sample)
    }

    fn available_space(&self, _path: &Path) -> io::Result<u64> {
        if self.disk_error.load(Ordering::SeqCst) {
            return Err(io::Error::other("volume not mounted"));
        }
        Ok(self.free.load(Ordering::SeqCst))
    }
}

type ErrorFactory = Box<dyn Fn() -> BackendError + Send + Sync>;

/// Backend with canned answers that records every call as `(op, target)`.
pub(crate) struct ScriptedBackend {
    name: String,
    stat: Mutex<Throughput>,
    transfers: Mutex<Vec<BackendTransfer>>,
    calls: Mutex<Vec<(String, String)>>,
    unreachable: AtomicBool,
    failing_targets: Mutex<HashSet<String>>,
    pending_failures: Mutex<Vec<ErrorFactory>>,
}

impl ScriptedBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stat: Mutex::new(Throughput::default()),
            transfers: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            unreachable: AtomicBool::new(false),
            failing_targets: Mutex::new(HashSet::new()),
            pending_failures: Mutex::new(Vec::new()),
        }
    }

    pub fn set_stat(&self, stat: Throughput) {
        *lock(&self.stat) = stat;
    }

    pub fn set_transfers(&self, transfers: Vec<BackendTransfer>) {
        *lock(&self.transfers) = transfers;
    }

    /// Every call times out while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Per-transfer calls on `id` are rejected.
    pub fn fail_target(&self, id: &str) {
        lock(&self.failing_targets).insert(id.to_string());
    }

    /// The next `n` calls fail with `make()`.
    pub fn fail_next(&self, n: usize, make: impl Fn() -> BackendError + Send + Sync + Clone + 'static) {
        let mut pending = lock(&self.pending_failures);
        for _ in 0..n {
            pending.push(Box::new(make.clone()));
        }
    }

    pub fn calls_to(&self, op: &str) -> usize {
        lock(&self.calls).iter().filter(|(o, _)| o == op).count()
    }

    pub fn targets_of(&self, op: &str) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter(|(o, _)| o == op)
            .map(|(_, target)| target.clone())
            .collect()
    }

    fn enter(&self, op: &str, target: &str) -> Result<(), BackendError> {
        lock(&self.calls).push((op.to_string(), target.to_string()));
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(BackendError::Timeout);
        }
        {
            let mut pending = lock(&self.pending_failures);
            if !pending.is_empty() {
                let make = pending.remove(0);
                return Err(make());
            }
        }
        if lock(&self.failing_targets).contains(target) {
            return Err(BackendError::Rejected {
                code: 1,
                message: format!("{target} is stuck"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TransferBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn global_stat(&self) -> Result<Throughput, BackendError> {
        self.enter("global_stat", "")?;
        Ok(*lock(&self.stat))
    }

    async fn list_transfers(&self) -> Result<Vec<BackendTransfer>, BackendError> {
        self.enter("list_transfers", "")?;
        Ok(lock(&self.transfers).clone())
    }

    async fn pause_all(&self) -> Result<(), BackendError> {
        self.enter("pause_all", "")
    }

    async fn force_remove(&self, id: &str) -> Result<(), BackendError> {
        self.enter("force_remove", id)
    }

    async fn purge_result(&self, id: &str) -> Result<(), BackendError> {
        self.enter("purge_result", id)
    }

    async fn change_option(&self, id: &str, _key: &str, _value: &str) -> Result<(), BackendError> {
        self.enter("change_option", id)
    }

    async fn change_global_option(&self, _key: &str, _value: &str) -> Result<(), BackendError> {
        self.enter("change_global_option", "")
    }
}
