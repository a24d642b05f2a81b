//! Shared outbox of locally-originated messages.
//!
//! A pending send must survive its channel view being torn down and
//! reopened, and several views of the same channel may be open at once, so
//! the outbox is a cloneable handle around one mutex-guarded map keyed by
//! channel URL.  Sessions only ever read point-in-time snapshots; the lock
//! is independent of any session task.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use causette_shared::{ChannelUrl, Message, RequestId, SendingStatus};

#[derive(Debug, Clone, Default)]
pub struct Outbox {
    inner: Arc<Mutex<HashMap<ChannelUrl, Vec<Message>>>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pending send, replacing any entry with the same request id.
    /// Resends therefore never accumulate stale duplicates: the request id
    /// is reused and the failed entry is overwritten in place.
    pub async fn register(&self, message: Message) {
        let Some(request_id) = message.request_id.clone() else {
            debug!(channel = %message.channel_url, "refusing to register message without request id");
            return;
        };

        let mut inner = self.inner.lock().await;
        let entries = inner.entry(message.channel_url.clone()).or_default();
        match entries
            .iter_mut()
            .find(|m| m.request_id.as_ref() == Some(&request_id))
        {
            Some(slot) => *slot = message,
            None => entries.push(message),
        }
    }

    /// Mark an in-flight send as failed, keeping it visible for retry or
    /// discard.  Returns false when the entry is gone.
    pub async fn mark_failed(&self, channel_url: &ChannelUrl, request_id: &RequestId) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(entries) = inner.get_mut(channel_url) else {
            return false;
        };
        match entries
            .iter_mut()
            .find(|m| m.request_id.as_ref() == Some(request_id))
        {
            Some(slot) => {
                slot.sending_status = SendingStatus::Failed;
                true
            }
            None => false,
        }
    }

    /// Remove a completed send and return it.
    pub async fn complete(
        &self,
        channel_url: &ChannelUrl,
        request_id: &RequestId,
    ) -> Option<Message> {
        let mut inner = self.inner.lock().await;
        let entries = inner.get_mut(channel_url)?;
        let position = entries
            .iter()
            .position(|m| m.request_id.as_ref() == Some(request_id))?;
        let message = entries.remove(position);
        if entries.is_empty() {
            inner.remove(channel_url);
        }
        Some(message)
    }

    /// Drop a failed send the user no longer wants.  Pure data removal:
    /// nothing is cancelled on the network.
    pub async fn discard(&self, channel_url: &ChannelUrl, request_id: &RequestId) -> bool {
        self.complete(channel_url, request_id).await.is_some()
    }

    /// Remove every entry matching one of `request_ids`.  Used when a
    /// confirmed-and-deleted message still has a stale pending echo.
    pub async fn purge(&self, channel_url: &ChannelUrl, request_ids: &[RequestId]) {
        if request_ids.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().await;
        if let Some(entries) = inner.get_mut(channel_url) {
            entries.retain(|m| {
                m.request_id
                    .as_ref()
                    .map_or(true, |id| !request_ids.contains(id))
            });
            if entries.is_empty() {
                inner.remove(channel_url);
            }
        }
    }

    /// Look up one entry by request id.
    pub async fn get(&self, channel_url: &ChannelUrl, request_id: &RequestId) -> Option<Message> {
        let inner = self.inner.lock().await;
        inner
            .get(channel_url)?
            .iter()
            .find(|m| m.request_id.as_ref() == Some(request_id))
            .cloned()
    }

    /// Point-in-time copy of a channel's pending sends, in registration
    /// order.
    pub async fn snapshot(&self, channel_url: &ChannelUrl) -> Vec<Message> {
        let inner = self.inner.lock().await;
        inner.get(channel_url).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use causette_shared::{MessageBody, UserId};

    fn channel() -> ChannelUrl {
        ChannelUrl::new("channel/test")
    }

    fn draft(text: &str) -> Message {
        Message::draft(
            channel(),
            UserId::new("alice"),
            MessageBody::User { text: text.into() },
        )
    }

    #[tokio::test]
    async fn test_register_and_snapshot() {
        let outbox = Outbox::new();
        let message = draft("hello");
        outbox.register(message.clone()).await;

        let snapshot = outbox.snapshot(&channel()).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].request_id, message.request_id);

        let other = ChannelUrl::new("channel/other");
        assert!(outbox.snapshot(&other).await.is_empty());
    }

    #[tokio::test]
    async fn test_register_replaces_same_request_id() {
        let outbox = Outbox::new();
        let mut message = draft("first try");
        outbox.register(message.clone()).await;

        message.sending_status = SendingStatus::Pending;
        message.body = MessageBody::User {
            text: "second try".into(),
        };
        outbox.register(message.clone()).await;

        let snapshot = outbox.snapshot(&channel()).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].body, message.body);
    }

    #[tokio::test]
    async fn test_complete_removes_entry() {
        let outbox = Outbox::new();
        let message = draft("hello");
        let request_id = message.request_id.clone().unwrap();
        outbox.register(message).await;

        let taken = outbox.complete(&channel(), &request_id).await;
        assert!(taken.is_some());
        assert!(outbox.snapshot(&channel()).await.is_empty());

        // Completing again is a no-op.
        assert!(outbox.complete(&channel(), &request_id).await.is_none());
    }

    #[tokio::test]
    async fn test_mark_failed_then_discard() {
        let outbox = Outbox::new();
        let message = draft("hello");
        let request_id = message.request_id.clone().unwrap();
        outbox.register(message).await;

        assert!(outbox.mark_failed(&channel(), &request_id).await);
        let snapshot = outbox.snapshot(&channel()).await;
        assert_eq!(snapshot[0].sending_status, SendingStatus::Failed);
        assert!(snapshot[0].is_resendable());

        assert!(outbox.discard(&channel(), &request_id).await);
        assert!(outbox.snapshot(&channel()).await.is_empty());
    }

    #[tokio::test]
    async fn test_purge_removes_listed_ids_only() {
        let outbox = Outbox::new();
        let keep = draft("keep");
        let stale = draft("stale");
        let stale_id = stale.request_id.clone().unwrap();
        outbox.register(keep.clone()).await;
        outbox.register(stale).await;

        outbox.purge(&channel(), &[stale_id]).await;
        let snapshot = outbox.snapshot(&channel()).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].request_id, keep.request_id);
    }

    #[tokio::test]
    async fn test_cloned_handles_share_state() {
        let outbox = Outbox::new();
        let other_handle = outbox.clone();

        outbox.register(draft("hello")).await;
        assert_eq!(other_handle.snapshot(&channel()).await.len(), 1);
    }
}
