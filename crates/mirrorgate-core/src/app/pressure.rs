//! QueueController - CPU/memory-driven displacement and resumption.
//!
//! Displacement needs a full window at or above the high mark; resumption
//! needs a full window at or below the low mark. The bands never overlap
//! (`Settings::validate`), so a borderline sample cannot flip a task back and
//! forth. This controller only delays tasks, it never cancels them.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info};

use crate::config::PressureSettings;
use crate::ports::{Notifier, ResourceSample, SystemProbe, TransferTask, notify_expiring};
use crate::queue::{Pressure, RollingWindow, TaskRegistry, TaskSnapshot};

/// Threshold state of one resource after the latest sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Band {
    High,
    Low,
    Between,
}

struct Windows {
    cpu: RollingWindow<f32>,
    memory: RollingWindow<f32>,
}

/// Counters returned by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PressureReport {
    pub displaced: usize,
    pub resumed: usize,
}

pub struct QueueController {
    settings: PressureSettings,
    registry: Arc<TaskRegistry>,
    probe: Arc<dyn SystemProbe>,
    notifier: Arc<dyn Notifier>,
    notice_ttl: Duration,
    windows: Mutex<Windows>,
}

impl QueueController {
    pub fn new(
        settings: PressureSettings,
        registry: Arc<TaskRegistry>,
        probe: Arc<dyn SystemProbe>,
        notifier: Arc<dyn Notifier>,
        notice_ttl: Duration,
    ) -> Self {
        let windows = Windows {
            cpu: RollingWindow::new(settings.window),
            memory: RollingWindow::new(settings.window),
        };
        Self {
            settings,
            registry,
            probe,
            notifier,
            notice_ttl,
            windows: Mutex::new(windows),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Windows> {
        match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Push one sample and classify both windows.
    fn record(&self, sample: ResourceSample) -> (Band, Band) {
        let s = &self.settings;
        let mut windows = self.lock();
        windows.cpu.push(sample.cpu_percent);
        windows.memory.push(sample.memory_percent);
        (
            band(&windows.cpu, s.cpu_high, s.cpu_low),
            band(&windows.memory, s.memory_high, s.memory_low),
        )
    }

    pub async fn sweep(&self) -> PressureReport {
        let sample = self.probe.sample();
        let (cpu, memory) = self.record(sample);
        debug!(
            cpu = sample.cpu_percent,
            memory = sample.memory_percent,
            ?cpu,
            ?memory,
            "resource sample"
        );
        if cpu == Band::Between && memory == Band::Between {
            return PressureReport::default();
        }

        let snapshot = self.registry.snapshot().await;
        let mut report = PressureReport::default();
        for (pressure, state) in [(Pressure::Cpu, cpu), (Pressure::Memory, memory)] {
            match state {
                Band::High => report.displaced += self.displace_all(&snapshot, pressure).await,
                Band::Low => report.resumed += self.resume_all(&snapshot, pressure).await,
                Band::Between => {}
            }
        }
        if report != PressureReport::default() {
            info!(
                displaced = report.displaced,
                resumed = report.resumed,
                "queue controller moved tasks"
            );
        }
        report
    }

    async fn displace_all(&self, snapshot: &[TaskSnapshot], pressure: Pressure) -> usize {
        let mut moved = 0;
        for entry in snapshot {
            if !entry.placement.is_running() || entry.displaced.is_some() || entry.cancel_requested
            {
                continue;
            }
            if !self.is_heavy(entry.task.as_ref(), pressure).await {
                continue;
            }
            // Fails when the task finished or another pressure already took it.
            if !self.registry.displace(entry.id, pressure).await {
                continue;
            }
            moved += 1;
            info!(task = %entry.id, reason = pressure.label(), "task displaced");
            let text = format!(
                "{} queued due to {}. It resumes automatically once load drops.",
                entry.task.name(),
                pressure.label()
            );
            self.send(entry.task.as_ref(), &text).await;
        }
        moved
    }

    async fn resume_all(&self, snapshot: &[TaskSnapshot], pressure: Pressure) -> usize {
        let mut moved = 0;
        for entry in snapshot.iter().filter(|e| e.displaced == Some(pressure)) {
            if !self.registry.resume(entry.id, pressure).await {
                continue;
            }
            moved += 1;
            info!(task = %entry.id, reason = pressure.label(), "task resumed");
            let text = format!("{} resumed, {} has eased.", entry.task.name(), pressure.label());
            self.send(entry.task.as_ref(), &text).await;
        }
        moved
    }

    async fn is_heavy(&self, task: &dyn TransferTask, pressure: Pressure) -> bool {
        let Some(status) = task.status().await else {
            return false;
        };
        match pressure {
            Pressure::Cpu => status.is_cpu_intensive(),
            Pressure::Memory => {
                status.is_transferring()
                    && task
                        .size()
                        .await
                        .is_some_and(|size| size > 0 && size > self.settings.large_file())
            }
        }
    }

    async fn send(&self, task: &dyn TransferTask, text: &str) {
        notify_expiring(self.notifier.as_ref(), task.owner(), text, self.notice_ttl).await;
    }
}

fn band(window: &RollingWindow<f32>, high: f32, low: f32) -> Band {
    if window.full_and_all(|s| s >= high) {
        Band::High
    } else if window.full_and_all(|s| s <= low) {
        Band::Low
    } else {
        Band::Between
    }
}
