//! Production implementations of the ports.
//!
//! - **HostProbe**: sysinfo CPU/memory readings and fs2 free space
//! - **LogNotifier**: a `Notifier` that writes notices to the log, for
//!   running without a chat connection

pub mod host_probe;
pub mod log_notifier;

pub use self::host_probe::HostProbe;
pub use self::log_notifier::LogNotifier;
