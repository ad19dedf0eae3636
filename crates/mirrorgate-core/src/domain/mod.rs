//! Domain model (IDs, task classification, decisions, sizes).

pub mod decision;
pub mod format;
pub mod ids;
pub mod task;

pub use decision::{Decision, HealthReason, LimitKind, Verdict};
pub use ids::{MessageId, TaskId, UserId};
pub use format::{GIB, KIB, MIB, format_duration, format_size, gib_to_bytes};
pub use task::{Category, Destination, TaskContext, TaskKind, TaskStatus};
