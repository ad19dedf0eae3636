//! RetryingBackend - bounded retry applied to every call of a backend.

use async_trait::async_trait;

use super::{BackendError, BackendTransfer, Throughput, TransferBackend};
use crate::queue::RetryPolicy;

/// Adapter that runs each call of `B` through `policy`.
pub struct RetryingBackend<B> {
    inner: B,
    policy: RetryPolicy,
}

impl<B: TransferBackend> RetryingBackend<B> {
    pub fn new(inner: B, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    fn op(&self, call: &str) -> String {
        format!("{}.{call}", self.inner.name())
    }
}

#[async_trait]
impl<B: TransferBackend> TransferBackend for RetryingBackend<B> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn global_stat(&self) -> Result<Throughput, BackendError> {
        self.policy
            .run(&self.op("global_stat"), || self.inner.global_stat())
            .await
    }

    async fn list_transfers(&self) -> Result<Vec<BackendTransfer>, BackendError> {
        self.policy
            .run(&self.op("list_transfers"), || self.inner.list_transfers())
            .await
    }

    async fn pause_all(&self) -> Result<(), BackendError> {
        self.policy
            .run(&self.op("pause_all"), || self.inner.pause_all())
            .await
    }

    async fn force_remove(&self, id: &str) -> Result<(), BackendError> {
        self.policy
            .run(&self.op("force_remove"), || self.inner.force_remove(id))
            .await
    }

    async fn purge_result(&self, id: &str) -> Result<(), BackendError> {
        self.policy
            .run(&self.op("purge_result"), || self.inner.purge_result(id))
            .await
    }

    async fn change_option(&self, id: &str, key: &str, value: &str) -> Result<(), BackendError> {
        self.policy
            .run(&self.op("change_option"), || {
                self.inner.change_option(id, key, value)
            })
            .await
    }

    async fn change_global_option(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.policy
            .run(&self.op("change_global_option"), || {
                self.inner.change_global_option(key, value)
            })
            .await
    }
}
