//! LogNotifier - writes notices to the log instead of a chat.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::domain::{MessageId, UserId};
use crate::error::NotifyError;
use crate::ports::Notifier;

#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, owner: UserId, text: &str) -> Result<MessageId, NotifyError> {
        let message = MessageId::generate();
        info!(%owner, %message, text, "notice");
        Ok(message)
    }

    async fn schedule_auto_delete(&self, message: MessageId, after: Duration) {
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            debug!(%message, "notice expired");
        });
    }
}
