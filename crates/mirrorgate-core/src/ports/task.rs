//! TransferTask port - the capability set an engine exposes for one task.
//!
//! The engine that runs a task owns and mutates it; this subsystem only reads
//! the probes below and may ask for cancellation. Every probe is optional:
//! `None` means "no signal", never an error.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Category, TaskId, TaskKind, TaskStatus, UserId};

/// Answer to a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelAck {
    /// The engine accepted the request and will stop on its own schedule.
    Requested,
    /// The task has no cancel capability; the engine only learns of the
    /// request through the registry's cancelled flag.
    Unsupported,
}

/// Live handle of one in-flight transfer.
///
/// # Design
/// - Identity fields are synchronous and always present.
/// - Progress probes are async because engines may need a backend round trip.
/// - Default methods return "no signal", so an engine implements only what it
///   can actually report.
#[async_trait]
pub trait TransferTask: Send + Sync {
    fn id(&self) -> TaskId;

    /// Initial kind; the registry tracks later download→upload moves itself.
    fn kind(&self) -> TaskKind;

    fn category(&self) -> Category;

    fn owner(&self) -> UserId;

    fn started_at(&self) -> DateTime<Utc>;

    /// Display name used in notifications.
    fn name(&self) -> String {
        self.id().to_string()
    }

    async fn status(&self) -> Option<TaskStatus> {
        None
    }

    /// Current throughput in bytes per second.
    async fn speed(&self) -> Option<u64> {
        None
    }

    /// Remaining time. `None` is treated as infinite.
    async fn eta(&self) -> Option<Duration> {
        None
    }

    /// Total size; `None` (or 0) while the engine has not negotiated it yet.
    async fn size(&self) -> Option<u64> {
        None
    }

    async fn processed_bytes(&self) -> Option<u64> {
        None
    }

    async fn cancel(&self) -> CancelAck {
        CancelAck::Unsupported
    }
}
