//! LimitChecker - the admission gate.
//!
//! Checks run in a fixed precedence and stop at the first violation:
//! 1. trusted/exempt caller → admit
//! 2. minimum interval between tasks
//! 3. category size cap
//! 4. playlist item cap
//! 5. leech size cap
//! 6. storage headroom (not for clones)
//! 7. daily task count
//! 8. daily mirror / leech bytes
//! 9. concurrent tasks per user, then overall
//!
//! Steps 2..9 and the ledger charge run under the ledger guard, so two
//! admissions for the same user are serialised.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::ledger::{UsageLedger, UsageRecord};
use crate::config::LimitSettings;
use crate::domain::{
    Category, Decision, Destination, LimitKind, TaskContext, format_duration, format_size,
};
use crate::ports::{Clock, SystemProbe};
use crate::queue::TaskRegistry;

pub struct LimitChecker {
    settings: LimitSettings,
    download_dir: PathBuf,
    ledger: Arc<UsageLedger>,
    registry: Arc<TaskRegistry>,
    probe: Arc<dyn SystemProbe>,
    clock: Arc<dyn Clock>,
}

/// Registry counts read before the ledger guard is taken.
#[derive(Debug, Clone, Copy)]
struct ActiveCounts {
    owned: usize,
    total: usize,
}

impl LimitChecker {
    pub fn new(
        settings: LimitSettings,
        download_dir: PathBuf,
        ledger: Arc<UsageLedger>,
        registry: Arc<TaskRegistry>,
        probe: Arc<dyn SystemProbe>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            download_dir,
            ledger,
            registry,
            probe,
            clock,
        }
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    /// Decide whether a task of `size` bytes may be registered. `size` is 0
    /// when unknown, which passes every size check.
    ///
    /// On admit the user's ledger is charged before the guard is released.
    pub async fn check(&self, size: u64, ctx: &TaskContext) -> Decision {
        if ctx.trusted || self.settings.exempt_users.contains(&ctx.user) {
            return Decision::Admit;
        }

        let (owned, total) = self.registry.active_counts(ctx.user).await;
        let active = ActiveCounts { owned, total };
        let now = self.clock.now();

        let decision = self.ledger.with_record(ctx.user, now, |record| {
            let decision = self.evaluate(size, ctx, record, active, now);
            if decision.is_admit() {
                record.charge(ctx.destination, size, now);
            }
            decision
        });

        match &decision {
            Decision::Admit => debug!(user = %ctx.user, size, "task admitted"),
            Decision::Reject { limit, .. } => {
                debug!(user = %ctx.user, size, ?limit, "task rejected")
            }
        }
        decision
    }

    fn evaluate(
        &self,
        size: u64,
        ctx: &TaskContext,
        record: &UsageRecord,
        active: ActiveCounts,
        now: DateTime<Utc>,
    ) -> Decision {
        let s = &self.settings;

        if let (true, Some(last)) = (s.task_interval_secs > 0, record.last_task_at) {
            let interval = Duration::from_secs(s.task_interval_secs);
            let since = (now - last).to_std().unwrap_or(Duration::ZERO);
            if since < interval {
                return Decision::reject(
                    LimitKind::TaskInterval,
                    format!(
                        "Please wait {} before starting another task. Minimum interval between tasks is {}.",
                        format_duration(interval - since),
                        format_duration(interval),
                    ),
                );
            }
        }

        let cap = s.category_cap(ctx.category);
        if cap > 0 && size > cap {
            return Decision::reject(
                LimitKind::CategorySize,
                format!(
                    "{} limit is {}. Your task is {}.",
                    ctx.category.label(),
                    format_size(cap),
                    format_size(size),
                ),
            );
        }

        let items = ctx.playlist_items.unwrap_or(0);
        if ctx.category == Category::VideoSite && s.playlist_items > 0 && items > s.playlist_items
        {
            return Decision::reject(
                LimitKind::PlaylistItems,
                format!(
                    "Playlist limit is {} items. This playlist has {items}.",
                    s.playlist_items
                ),
            );
        }

        let leech_cap = s.leech_cap();
        if ctx.destination == Destination::Leech && leech_cap > 0 && size > leech_cap {
            return Decision::reject(
                LimitKind::LeechSize,
                format!(
                    "Leech limit is {}. Your task is {}.",
                    format_size(leech_cap),
                    format_size(size),
                ),
            );
        }

        if let Some(decision) = self.check_storage(size, ctx) {
            return decision;
        }

        if s.daily_tasks > 0 && record.tasks_today >= s.daily_tasks {
            return Decision::reject(
                LimitKind::DailyTasks,
                format!(
                    "Daily task limit is {}. You have used {} today.",
                    s.daily_tasks, record.tasks_today
                ),
            );
        }

        let (daily_cap, limit, label) = match ctx.destination {
            Destination::Mirror => (s.daily_mirror_cap(), LimitKind::DailyMirror, "mirror"),
            Destination::Leech => (s.daily_leech_cap(), LimitKind::DailyLeech, "leech"),
        };
        let used = record.bytes_today(ctx.destination);
        if daily_cap > 0 && used.saturating_add(size) > daily_cap {
            return Decision::reject(
                limit,
                format!(
                    "Daily {label} limit is {}. You have used {} today.",
                    format_size(daily_cap),
                    format_size(used),
                ),
            );
        }

        if s.user_max_tasks > 0 && active.owned >= s.user_max_tasks {
            return Decision::reject(
                LimitKind::UserTasks,
                format!(
                    "You can run at most {} tasks at once. Wait for one to finish.",
                    s.user_max_tasks
                ),
            );
        }

        if s.max_tasks > 0 && active.total >= s.max_tasks {
            return Decision::reject(
                LimitKind::TotalTasks,
                format!(
                    "Task limit is {}. Try again when a running task finishes.",
                    s.max_tasks
                ),
            );
        }

        Decision::Admit
    }

    fn check_storage(&self, size: u64, ctx: &TaskContext) -> Option<Decision> {
        let floor = self.settings.storage_floor();
        if floor == 0 || ctx.category == Category::Clone {
            return None;
        }
        let needed = if ctx.needs_extra_space {
            size.saturating_mul(2)
        } else {
            size
        };
        let free = match self.probe.available_space(&self.download_dir) {
            Ok(free) => free,
            Err(err) => {
                warn!(dir = %self.download_dir.display(), error = %err, "free space unavailable, skipping storage check");
                return None;
            }
        };
        if free < needed.saturating_add(floor) {
            return Some(Decision::reject(
                LimitKind::StorageFloor,
                format!(
                    "Storage threshold is {}. Free space is {} and this task needs {}.",
                    format_size(floor),
                    format_size(free),
                    format_size(needed),
                ),
            ));
        }
        None
    }
}
