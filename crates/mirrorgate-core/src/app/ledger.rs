//! Per-user daily usage ledger.
//!
//! Counters reset at UTC midnight: a record whose `reset_day` differs from
//! today's UTC date is zeroed the next time it is touched. `last_task_at`
//! survives the reset because the task-interval limit spans midnight.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};

use crate::domain::{Destination, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    pub tasks_today: u32,
    pub mirror_bytes_today: u64,
    pub leech_bytes_today: u64,
    pub last_task_at: Option<DateTime<Utc>>,
    pub reset_day: NaiveDate,
}

impl UsageRecord {
    fn fresh(day: NaiveDate) -> Self {
        Self {
            tasks_today: 0,
            mirror_bytes_today: 0,
            leech_bytes_today: 0,
            last_task_at: None,
            reset_day: day,
        }
    }

    fn roll_over(&mut self, today: NaiveDate) {
        if self.reset_day != today {
            self.tasks_today = 0;
            self.mirror_bytes_today = 0;
            self.leech_bytes_today = 0;
            self.reset_day = today;
        }
    }

    /// Bytes charged today against `destination`.
    pub fn bytes_today(&self, destination: Destination) -> u64 {
        match destination {
            Destination::Mirror => self.mirror_bytes_today,
            Destination::Leech => self.leech_bytes_today,
        }
    }

    /// Charge one admitted task.
    pub fn charge(&mut self, destination: Destination, size: u64, at: DateTime<Utc>) {
        self.tasks_today = self.tasks_today.saturating_add(1);
        match destination {
            Destination::Mirror => {
                self.mirror_bytes_today = self.mirror_bytes_today.saturating_add(size)
            }
            Destination::Leech => {
                self.leech_bytes_today = self.leech_bytes_today.saturating_add(size)
            }
        }
        self.last_task_at = Some(at);
    }
}

/// In-memory ledger; durability is left to the embedding application.
#[derive(Debug, Default)]
pub struct UsageLedger {
    records: Mutex<HashMap<UserId, UsageRecord>>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UserId, UsageRecord>> {
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Run `f` on the user's record, rolled over to `now`'s day, while holding
    /// the ledger guard. Check-then-charge inside one call cannot interleave
    /// with another admission.
    pub fn with_record<R>(
        &self,
        user: UserId,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut UsageRecord) -> R,
    ) -> R {
        let today = now.date_naive();
        let mut records = self.lock();
        let record = records
            .entry(user)
            .or_insert_with(|| UsageRecord::fresh(today));
        record.roll_over(today);
        f(record)
    }

    /// Copy of the user's record as of `now`.
    pub fn record(&self, user: UserId, now: DateTime<Utc>) -> UsageRecord {
        self.with_record(user, now, |record| record.clone())
    }
}
