//! mirrorgate-core
//!
//! Admission, monitoring and backend resilience for a multi-user transfer
//! bot.
//!
//! # Modules
//! - **domain**: ids, task classification, decisions, size formatting
//! - **ports**: seams to transfer engines, the chat, the host and the clock
//! - **queue**: task registry with running/queued tables, signals, retry
//! - **app**: limit checker, health monitor, queue controller, supervisor
//! - **backend**: aria2 / qBittorrent clients and the backend manager
//! - **impls**: production implementations of the ports
//! - **config**, **error**, **observability**: settings, error types, tracing

pub mod app;
pub mod backend;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;

#[cfg(test)]
pub(crate) mod test_support;

pub use app::{Supervisor, SupervisorBuilder, SupervisorHandle};
pub use config::Settings;
