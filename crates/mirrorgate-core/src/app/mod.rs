//! App - the components built on top of the registry and the ports.
//!
//! # Components
//! - **LimitChecker**: admission gate backed by the per-user `UsageLedger`
//! - **HealthMonitor**: periodic stall detection with warn→cancel
//! - **QueueController**: periodic CPU/memory displacement and resumption
//! - **Supervisor**: wiring, the public entry points and the sweep loops

pub mod health;
pub mod ledger;
pub mod limits;
pub mod pressure;
pub mod supervisor;

pub use self::health::{
    DefaultHealthDecider, HealthDecider, HealthMonitor, HealthReport, Observation, Warning,
};
pub use self::ledger::{UsageLedger, UsageRecord};
pub use self::limits::LimitChecker;
pub use self::pressure::{PressureReport, QueueController};
pub use self::supervisor::{BuildError, Supervisor, SupervisorBuilder, SupervisorHandle};
