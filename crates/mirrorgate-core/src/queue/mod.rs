//! Queue module: task registry, resumption signals, rolling windows and the
//! backend retry policy.

mod registry;
mod retry;
mod signal;
mod window;

pub use registry::{Placement, Pressure, RegistryError, Slot, TaskRegistry, TaskSnapshot};
pub use retry::{RetryPolicy, Retryable};
pub use signal::ResumeSignal;
pub use window::RollingWindow;
