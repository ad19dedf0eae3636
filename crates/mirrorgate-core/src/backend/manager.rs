//! BackendManager - aggregate and bulk operations over every backend.
//!
//! One backend failing never stops the others: failures are logged and
//! reported in the returned outcome, never raised.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::{BackendTransfer, Throughput, TransferBackend, TransferState};

/// Summed throughput of the backends that answered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OverallSpeed {
    pub download: u64,
    pub upload: u64,
    pub reachable: Vec<String>,
    pub unreachable: Vec<String>,
}

/// Result of a best-effort bulk operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkOutcome {
    /// Calls that succeeded.
    pub applied: usize,
    /// Per-transfer calls that failed on a reachable backend.
    pub failed: usize,
    /// Backends that could not be reached at all.
    pub unreachable: Vec<String>,
}

impl BulkOutcome {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.unreachable.is_empty()
    }
}

#[derive(Clone, Default)]
pub struct BackendManager {
    backends: Vec<Arc<dyn TransferBackend>>,
}

impl BackendManager {
    pub fn new(backends: Vec<Arc<dyn TransferBackend>>) -> Self {
        Self { backends }
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub async fn overall_speed(&self) -> OverallSpeed {
        let mut total = OverallSpeed::default();
        for backend in &self.backends {
            match backend.global_stat().await {
                Ok(Throughput { download, upload }) => {
                    total.download = total.download.saturating_add(download);
                    total.upload = total.upload.saturating_add(upload);
                    total.reachable.push(backend.name().to_string());
                }
                Err(err) => {
                    warn!(backend = backend.name(), error = %err, "global stat unavailable");
                    total.unreachable.push(backend.name().to_string());
                }
            }
        }
        total
    }

    pub async fn pause_all(&self) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for backend in &self.backends {
            match backend.pause_all().await {
                Ok(()) => outcome.applied += 1,
                Err(err) => {
                    warn!(backend = backend.name(), error = %err, "pause all failed");
                    outcome.unreachable.push(backend.name().to_string());
                }
            }
        }
        outcome
    }

    /// Force-remove live transfers and purge finished ones.
    pub async fn remove_all(&self) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for backend in &self.backends {
            let Some(transfers) = self.list(backend.as_ref(), &mut outcome).await else {
                continue;
            };
            for BackendTransfer { id, state } in transfers {
                let result = if state.is_live() {
                    backend.force_remove(&id).await
                } else {
                    backend.purge_result(&id).await
                };
                match result {
                    Ok(()) => outcome.applied += 1,
                    Err(err) => {
                        outcome.failed += 1;
                        warn!(backend = backend.name(), transfer = %id, ?state, error = %err, "remove failed");
                    }
                }
            }
        }
        debug!(applied = outcome.applied, failed = outcome.failed, "remove all finished");
        outcome
    }

    /// Apply `key=value` to every unfinished transfer, then as the global
    /// default. Per-transfer failures are counted and logged.
    pub async fn change_global_option(&self, key: &str, value: &str) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for backend in &self.backends {
            let Some(transfers) = self.list(backend.as_ref(), &mut outcome).await else {
                continue;
            };
            for transfer in transfers
                .iter()
                .filter(|t| t.state != TransferState::Complete)
            {
                match backend.change_option(&transfer.id, key, value).await {
                    Ok(()) => outcome.applied += 1,
                    Err(err) => {
                        outcome.failed += 1;
                        warn!(backend = backend.name(), transfer = %transfer.id, key, error = %err, "option change failed");
                    }
                }
            }
            match backend.change_global_option(key, value).await {
                Ok(()) => outcome.applied += 1,
                Err(err) => {
                    outcome.failed += 1;
                    warn!(backend = backend.name(), key, error = %err, "global option change failed");
                }
            }
        }
        outcome
    }

    async fn list(
        &self,
        backend: &dyn TransferBackend,
        outcome: &mut BulkOutcome,
    ) -> Option<Vec<BackendTransfer>> {
        match backend.list_transfers().await {
            Ok(transfers) => Some(transfers),
            Err(err) => {
                warn!(backend = backend.name(), error = %err, "listing transfers failed");
                outcome.unreachable.push(backend.name().to_string());
                None
            }
        }
    }
}
