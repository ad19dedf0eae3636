//! Backend clients: the transfer engines reached over RPC.
//!
//! - `TransferBackend`: the calls the manager needs from one engine
//! - `RetryingBackend`: wraps every call of a backend in a `RetryPolicy`
//! - `BackendManager`: aggregate speed and bulk lifecycle operations
//! - `Aria2Client` / `QbittorrentClient`: reqwest-based adapters

mod aria2;
mod manager;
mod qbittorrent;
mod retrying;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use self::aria2::Aria2Client;
pub use self::manager::{BackendManager, BulkOutcome, OverallSpeed};
pub use self::qbittorrent::QbittorrentClient;
pub use self::retrying::RetryingBackend;
pub use crate::error::BackendError;

/// Aggregate throughput in bytes per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Throughput {
    pub download: u64,
    pub upload: u64,
}

/// Lifecycle state of one backend-side transfer, normalised across engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Active,
    Waiting,
    Paused,
    Complete,
    Error,
    Removed,
}

impl TransferState {
    /// Still holds a slot or bandwidth on the engine.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            TransferState::Active | TransferState::Waiting | TransferState::Paused
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendTransfer {
    /// Engine-side identifier (aria2 GID, torrent info-hash).
    pub id: String,
    pub state: TransferState,
}

impl BackendTransfer {
    pub fn new(id: impl Into<String>, state: TransferState) -> Self {
        Self {
            id: id.into(),
            state,
        }
    }
}

/// One transfer engine.
///
/// Option keys use aria2 naming (`max-download-limit`,
/// `max-overall-download-limit`, ...); other engines translate what they can
/// and answer `BackendError::Unsupported` for the rest.
#[async_trait]
pub trait TransferBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn global_stat(&self) -> Result<Throughput, BackendError>;

    async fn list_transfers(&self) -> Result<Vec<BackendTransfer>, BackendError>;

    async fn pause_all(&self) -> Result<(), BackendError>;

    /// Stop a live transfer and drop it.
    async fn force_remove(&self, id: &str) -> Result<(), BackendError>;

    /// Forget the result record of a finished transfer.
    async fn purge_result(&self, id: &str) -> Result<(), BackendError>;

    async fn change_option(&self, id: &str, key: &str, value: &str) -> Result<(), BackendError>;

    async fn change_global_option(&self, key: &str, value: &str) -> Result<(), BackendError>;
}

/// Parse an aria2-style rate (`"0"`, `"512K"`, `"2M"`) into bytes.
pub(crate) fn parse_rate(value: &str) -> Option<u64> {
    let value = value.trim();
    let (digits, unit) = match value.char_indices().last()? {
        (i, 'K' | 'k') => (&value[..i], 1024),
        (i, 'M' | 'm') => (&value[..i], 1024 * 1024),
        _ => (value, 1),
    };
    digits.trim().parse::<u64>().ok()?.checked_mul(unit)
}
