//! Tracing setup and queue counters.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LogSettings;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub registered: usize,
    pub running_download: usize,
    pub queued_download: usize,
    pub running_upload: usize,
    pub queued_upload: usize,
    /// Queued by resource pressure rather than capacity.
    pub displaced: usize,
    /// Tasks holding a health warning.
    pub warned: usize,
}

/// Install the global subscriber. `RUST_LOG` overrides `settings.filter`.
///
/// Returns false when a subscriber was already installed (tests, embedding).
pub fn init_tracing(settings: &LogSettings) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.filter.as_str()));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if settings.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false).compact())
            .try_init()
    };
    result.is_ok()
}
