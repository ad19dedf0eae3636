//! Resumption signal: a single-fire binary event an engine blocks on.

use std::sync::Arc;

use tokio::sync::watch;

/// Unset when installed; fired exactly once when the task may run.
///
/// Clones share the same event. A fresh signal is installed every time a task
/// is moved into a queued table, so a waiter holding an old, fired signal is
/// never confused by a later displacement.
#[derive(Debug, Clone)]
pub struct ResumeSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ResumeSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn fire(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until fired. Returns immediately if already fired.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for ResumeSignal {
    fn default() -> Self {
        Self::new()
    }
}
