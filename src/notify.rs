//! Outbound notifications — typed messages pushed onto named store
//! channels. Delivery is a downstream concern; enqueueing never blocks on
//! it.

use crate::error::StoreError;
use crate::store::Store;
use crate::threat::ThreatLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Well-known notification channels.
pub const CHANNEL_USER: &str = "user";
pub const CHANNEL_SECURITY_TEAM: &str = "security-team";
pub const CHANNEL_OPS_TEAM: &str = "ops-team";

/// A message placed on a notification channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub id: String,
    pub channel: String,
    /// Target user id for user-directed messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    pub subject: String,
    pub body: String,
    pub severity: ThreatLevel,
    pub created_at: DateTime<Utc>,
}

impl NotificationMessage {
    pub fn new(
        channel: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        severity: ThreatLevel,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            channel: channel.into(),
            recipient: None,
            subject: subject.into(),
            body: body.into(),
            severity,
            created_at: Utc::now(),
        }
    }

    pub fn to_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }
}

/// Fire-and-forget enqueue onto store-backed channels.
pub struct Notifier<S: Store> {
    store: Arc<S>,
    /// Messages retained per channel before the oldest are trimmed.
    queue_limit: i64,
}

impl<S: Store> Notifier<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            queue_limit: 1000,
        }
    }

    fn channel_key(channel: &str) -> String {
        format!("rampart:notify:{channel}")
    }

    /// Enqueue a message. The channel list is capped so an undelivered
    /// backlog cannot grow without bound.
    pub async fn send(&self, message: NotificationMessage) -> Result<(), StoreError> {
        let key = Self::channel_key(&message.channel);
        let payload = serde_json::to_string(&message)?;
        self.store.rpush(&key, &payload).await?;
        self.store.ltrim(&key, -self.queue_limit, -1).await?;
        tracing::debug!(channel = %message.channel, id = %message.id, "notification enqueued");
        Ok(())
    }

    /// Pending messages on a channel, oldest first.
    pub async fn pending(&self, channel: &str) -> Result<Vec<NotificationMessage>, StoreError> {
        let raw = self
            .store
            .lrange(&Self::channel_key(channel), 0, -1)
            .await?;
        let mut out = Vec::with_capacity(raw.len());
        for item in raw {
            out.push(serde_json::from_str(&item)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn send_and_read_back() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Notifier::new(store);

        let msg = NotificationMessage::new(
            CHANNEL_SECURITY_TEAM,
            "Brute force detected",
            "21 failed attempts against user-1",
            ThreatLevel::Critical,
        );
        notifier.send(msg.clone()).await.unwrap();

        let pending = notifier.pending(CHANNEL_SECURITY_TEAM).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, msg.id);
        assert_eq!(pending[0].severity, ThreatLevel::Critical);
    }

    #[tokio::test]
    async fn channels_are_independent() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Notifier::new(store);

        notifier
            .send(
                NotificationMessage::new(CHANNEL_USER, "s", "b", ThreatLevel::Low)
                    .to_recipient("user-1"),
            )
            .await
            .unwrap();

        assert_eq!(notifier.pending(CHANNEL_USER).await.unwrap().len(), 1);
        assert!(notifier.pending(CHANNEL_OPS_TEAM).await.unwrap().is_empty());
    }
}
