//! Ports - the seams to collaborators outside this subsystem.
//!
//! Transfer engines, the chat sink, the host and the wall clock are all
//! reached through these traits. Production implementations live in `impls`;
//! tests substitute fakes.

pub mod clock;
pub mod notifier;
pub mod probe;
pub mod task;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::notifier::{Notifier, notify_expiring};
pub use self::probe::{ResourceSample, SystemProbe};
pub use self::task::{CancelAck, TransferTask};
