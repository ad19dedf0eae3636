//! Decision model: admission outcomes and health verdicts.
//!
//! Both are plain values. The component that computes them does not act on
//! them; the supervisor/monitor applies the side effects afterwards.

use std::fmt;

/// Which configured limit rejected a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitKind {
    TaskInterval,
    CategorySize,
    PlaylistItems,
    LeechSize,
    StorageFloor,
    DailyTasks,
    DailyMirror,
    DailyLeech,
    UserTasks,
    TotalTasks,
}

/// Outcome of the admission gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Admit,
    Reject { limit: LimitKind, message: String },
}

impl Decision {
    pub fn reject(limit: LimitKind, message: impl Into<String>) -> Self {
        Decision::Reject {
            limit,
            message: message.into(),
        }
    }

    pub fn is_admit(&self) -> bool {
        matches!(self, Decision::Admit)
    }

    /// User-facing message for a rejection.
    pub fn message(&self) -> Option<&str> {
        match self {
            Decision::Admit => None,
            Decision::Reject { message, .. } => Some(message),
        }
    }
}

/// Why the health monitor flagged a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthReason {
    /// ETA infinite or beyond the long-ETA threshold after the elapsed threshold.
    NoProgress,
    /// Slow for a full window and ETA infinite or long.
    SlowLongEta,
    /// Slow for a full window and the remaining bytes would take too long.
    SlowCompletion,
}

impl fmt::Display for HealthReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthReason::NoProgress => f.write_str("long ETA / no progress"),
            HealthReason::SlowLongEta => f.write_str("slow download with long ETA"),
            HealthReason::SlowCompletion => f.write_str("slow download, completion too far away"),
        }
    }
}

/// What the health monitor should do with one task on this sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Healthy,
    /// Create the warning record and notify the owner once.
    Warn(HealthReason),
    /// Warned already; grace period still running.
    Wait,
    Cancel(HealthReason),
}
