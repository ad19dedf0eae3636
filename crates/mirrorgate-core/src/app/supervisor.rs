//! Supervisor - wiring and the periodic sweep loops.
//!
//! `SupervisorBuilder` validates the settings and collaborators up front
//! (fail-fast); `Supervisor::spawn` starts the health and pressure sweeps and
//! returns a handle that stops them.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::health::{DefaultHealthDecider, HealthDecider, HealthMonitor};
use super::ledger::UsageLedger;
use super::limits::LimitChecker;
use super::pressure::QueueController;
use crate::backend::{BackendManager, TransferBackend};
use crate::config::Settings;
use crate::domain::{Decision, TaskContext, TaskId};
use crate::error::ConfigError;
use crate::observability::QueueCounts;
use crate::ports::{Clock, Notifier, SystemClock, SystemProbe, TransferTask, notify_expiring};
use crate::queue::{RegistryError, Slot, TaskRegistry};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid settings: {0}")]
    Settings(#[from] ConfigError),

    #[error("no {0} configured. Call SupervisorBuilder::{0}() before build().")]
    Missing(&'static str),
}

/// Assembles a `Supervisor`.
///
/// # Example
/// ```ignore
/// let supervisor = SupervisorBuilder::new(settings)
///     .notifier(Arc::new(LogNotifier))
///     .probe(Arc::new(HostProbe::new()))
///     .backend(aria2)
///     .build()?;
/// let handle = supervisor.spawn();
/// ```
pub struct SupervisorBuilder {
    settings: Settings,
    notifier: Option<Arc<dyn Notifier>>,
    probe: Option<Arc<dyn SystemProbe>>,
    clock: Arc<dyn Clock>,
    decider: Option<Arc<dyn HealthDecider>>,
    backends: Vec<Arc<dyn TransferBackend>>,
}

impl SupervisorBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            notifier: None,
            probe: None,
            clock: Arc::new(SystemClock),
            decider: None,
            backends: Vec::new(),
        }
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn SystemProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the default warn→cancel decision table.
    pub fn decider(mut self, decider: Arc<dyn HealthDecider>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn TransferBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn build(self) -> Result<Supervisor, BuildError> {
        self.settings.validate()?;
        let notifier = self.notifier.ok_or(BuildError::Missing("notifier"))?;
        let probe = self.probe.ok_or(BuildError::Missing("probe"))?;
        let settings = self.settings;
        let notice_ttl = settings.notify.auto_delete();

        let registry = Arc::new(TaskRegistry::new(settings.queue));
        let limits = LimitChecker::new(
            settings.limits.clone(),
            settings.download_dir.clone(),
            Arc::new(UsageLedger::new()),
            Arc::clone(&registry),
            Arc::clone(&probe),
            Arc::clone(&self.clock),
        );
        let decider = self
            .decider
            .unwrap_or_else(|| Arc::new(DefaultHealthDecider::new(settings.health.clone())));
        let health = Arc::new(HealthMonitor::new(
            settings.health.clone(),
            decider,
            Arc::clone(&registry),
            Arc::clone(&notifier),
            Arc::clone(&self.clock),
            notice_ttl,
        ));
        let pressure = Arc::new(QueueController::new(
            settings.pressure.clone(),
            Arc::clone(&registry),
            probe,
            Arc::clone(&notifier),
            notice_ttl,
        ));

        Ok(Supervisor {
            registry,
            limits,
            health,
            pressure,
            backends: BackendManager::new(self.backends),
            notifier,
            notice_ttl,
            sweep_interval: settings.sweep_interval(),
        })
    }
}

/// Entry point for everything outside this crate.
pub struct Supervisor {
    registry: Arc<TaskRegistry>,
    limits: LimitChecker,
    health: Arc<HealthMonitor>,
    pressure: Arc<QueueController>,
    backends: BackendManager,
    notifier: Arc<dyn Notifier>,
    notice_ttl: Duration,
    sweep_interval: Duration,
}

impl Supervisor {
    /// Run the admission gate. A rejection is also sent to the user as an
    /// auto-expiring notice.
    pub async fn admit(&self, size: u64, ctx: &TaskContext) -> Decision {
        let decision = self.limits.check(size, ctx).await;
        if let Decision::Reject { message, .. } = &decision {
            notify_expiring(self.notifier.as_ref(), ctx.user, message, self.notice_ttl).await;
        }
        decision
    }

    pub async fn register(&self, task: Arc<dyn TransferTask>) -> Result<Slot, RegistryError> {
        self.registry.register(task).await
    }

    pub async fn unregister(&self, id: TaskId) -> bool {
        self.registry.unregister(id).await
    }

    pub async fn begin_upload(&self, id: TaskId) -> Result<Slot, RegistryError> {
        self.registry.begin_upload(id).await
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn limits(&self) -> &LimitChecker {
        &self.limits
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn pressure(&self) -> &QueueController {
        &self.pressure
    }

    pub fn backends(&self) -> &BackendManager {
        &self.backends
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    pub async fn counts(&self) -> QueueCounts {
        let mut counts = self.registry.counts().await;
        counts.warned = self.health.warned_count();
        counts
    }

    /// Start the health and pressure sweeps on `sweep_interval`.
    pub fn spawn(&self) -> SupervisorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let period = self.sweep_interval;

        let health = Arc::clone(&self.health);
        let health_loop = tokio::spawn(sweep_loop(
            "health",
            period,
            shutdown_rx.clone(),
            move || {
                let health = Arc::clone(&health);
                async move {
                    health.sweep().await;
                }
            },
        ));

        let pressure = Arc::clone(&self.pressure);
        let pressure_loop = tokio::spawn(sweep_loop(
            "pressure",
            period,
            shutdown_rx,
            move || {
                let pressure = Arc::clone(&pressure);
                async move {
                    pressure.sweep().await;
                }
            },
        ));

        info!(period_secs = period.as_secs(), "sweep loops started");
        SupervisorHandle {
            shutdown_tx,
            joins: vec![health_loop, pressure_loop],
        }
    }
}

/// Handle of the running sweep loops.
/// - `request_shutdown()` stops them after the sweep in progress
/// - `shutdown_and_join()` also waits for them to exit
pub struct SupervisorHandle {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl SupervisorHandle {
    pub fn request_shutdown(&self) {
        // ignore send error: loops may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            let _ = join.await;
        }
    }
}

/// Tick every `period`; an overrunning sweep delays the next tick rather than
/// stacking sweeps.
async fn sweep_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    mut sweep: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => sweep().await,
        }
    }
    debug!(sweep = name, "sweep loop stopped");
}
