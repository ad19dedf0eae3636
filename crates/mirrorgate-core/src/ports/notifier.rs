//! Notifier port - the chat-facing notification sink.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::domain::{MessageId, UserId};
use crate::error::NotifyError;

/// Sends, and later deletes, messages in the owner's chat.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, owner: UserId, text: &str) -> Result<MessageId, NotifyError>;

    /// Arrange for `message` to disappear after `after`.
    async fn schedule_auto_delete(&self, message: MessageId, after: Duration);
}

/// Send one auto-expiring notice.
///
/// Failures are logged and swallowed: a chat outage must not stop a sweep or
/// an admission decision.
pub async fn notify_expiring(
    notifier: &dyn Notifier,
    owner: UserId,
    text: &str,
    expire_after: Duration,
) -> Option<MessageId> {
    match notifier.notify(owner, text).await {
        Ok(message) => {
            notifier.schedule_auto_delete(message, expire_after).await;
            Some(message)
        }
        Err(err) => {
            warn!(owner = %owner, error = %err, "notification failed");
            None
        }
    }
}
