//! The message entity handed between the backend, the reconciliation core,
//! and the display layer.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the UI layer over IPC.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ChannelUrl, MessageId, RequestId, UserId};

// ---------------------------------------------------------------------------
// Sending status
// ---------------------------------------------------------------------------

/// Delivery state of a message as tracked by this client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SendingStatus {
    None,
    Pending,
    Failed,
    Canceled,
    Succeeded,
}

// ---------------------------------------------------------------------------
// Message body
// ---------------------------------------------------------------------------

/// Message payload variants.
///
/// Closed set: anything the backend delivers that matches none of the known
/// shapes is carried as [`MessageBody::Unknown`] with its raw payload, so it
/// stays visible in the timeline instead of being silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum MessageBody {
    /// Plain user text.
    User { text: String },
    /// File / attachment metadata (the blob itself lives with the backend).
    File {
        file_name: String,
        mime_type: String,
        file_size: u64,
    },
    /// System notice injected by the backend (joins, channel changes, ...).
    Admin { text: String },
    /// Unrecognized message type, kept verbatim.
    Unknown { payload: serde_json::Value },
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Effective identity of a message.
///
/// A confirmed message is identified by its server id; before confirmation
/// only the client-side request id exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    Confirmed(MessageId),
    Local(RequestId),
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-assigned id, present once the backend has acknowledged.
    pub message_id: Option<MessageId>,
    /// Client-assigned id, present for locally-originated messages.
    pub request_id: Option<RequestId>,
    /// The channel this message belongs to.
    pub channel_url: ChannelUrl,
    /// Who sent it.
    pub sender_id: UserId,
    /// Payload.
    pub body: MessageBody,
    /// When the message was created (as reported by the backend, or locally
    /// for drafts that have not been confirmed yet).
    pub created_at: DateTime<Utc>,
    /// When the message was last edited, if ever.
    pub updated_at: Option<DateTime<Utc>>,
    /// Delivery state.
    pub sending_status: SendingStatus,
    /// Emoji key -> users who reacted with it.
    pub reactions: BTreeMap<String, BTreeSet<UserId>>,
}

impl Message {
    /// A message acknowledged by the backend.
    pub fn received(
        message_id: MessageId,
        channel_url: ChannelUrl,
        sender_id: UserId,
        body: MessageBody,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: Some(message_id),
            request_id: None,
            channel_url,
            sender_id,
            body,
            created_at,
            updated_at: None,
            sending_status: SendingStatus::Succeeded,
            reactions: BTreeMap::new(),
        }
    }

    /// A locally-originated draft, visible immediately while the send is in
    /// flight. Gets a fresh request id that stays stable across resends.
    pub fn draft(channel_url: ChannelUrl, sender_id: UserId, body: MessageBody) -> Self {
        Self {
            message_id: None,
            request_id: Some(RequestId::generate()),
            channel_url,
            sender_id,
            body,
            created_at: Utc::now(),
            updated_at: None,
            sending_status: SendingStatus::Pending,
            reactions: BTreeMap::new(),
        }
    }

    /// Effective identity: server id when present, else request id.
    /// `None` for malformed messages carrying neither.
    pub fn key(&self) -> Option<MessageKey> {
        self.message_id
            .map(MessageKey::Confirmed)
            .or_else(|| self.request_id.clone().map(MessageKey::Local))
    }

    pub fn is_confirmed(&self) -> bool {
        self.message_id.is_some() && self.sending_status == SendingStatus::Succeeded
    }

    /// Whether the user may retry this send.
    pub fn is_resendable(&self) -> bool {
        self.request_id.is_some()
            && matches!(
                self.sending_status,
                SendingStatus::Failed | SendingStatus::Canceled
            )
    }

    /// Whether this message counts toward the viewer's new-message counter.
    /// System notices and unknown payloads do not.
    pub fn counts_as_activity(&self) -> bool {
        matches!(self.body, MessageBody::User { .. } | MessageBody::File { .. })
    }

    /// Failed and canceled entries are invisible to grouping: they neither
    /// form clusters nor break the clusters around them.
    pub fn participates_in_grouping(&self) -> bool {
        !matches!(
            self.sending_status,
            SendingStatus::Failed | SendingStatus::Canceled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> ChannelUrl {
        ChannelUrl::new("channel/test")
    }

    #[test]
    fn test_key_prefers_server_id() {
        let mut msg = Message::draft(
            channel(),
            UserId::new("alice"),
            MessageBody::User {
                text: "hello".into(),
            },
        );
        let request_id = msg.request_id.clone().unwrap();
        assert_eq!(msg.key(), Some(MessageKey::Local(request_id)));

        msg.message_id = Some(MessageId(7));
        assert_eq!(msg.key(), Some(MessageKey::Confirmed(MessageId(7))));
    }

    #[test]
    fn test_draft_is_pending_and_resendable_after_failure() {
        let mut msg = Message::draft(
            channel(),
            UserId::new("alice"),
            MessageBody::User { text: "hi".into() },
        );
        assert_eq!(msg.sending_status, SendingStatus::Pending);
        assert!(!msg.is_resendable());

        msg.sending_status = SendingStatus::Failed;
        assert!(msg.is_resendable());
        assert!(!msg.participates_in_grouping());
    }

    #[test]
    fn test_admin_messages_are_not_activity() {
        let msg = Message::received(
            MessageId(1),
            channel(),
            UserId::new("system"),
            MessageBody::Admin {
                text: "alice joined".into(),
            },
            Utc::now(),
        );
        assert!(!msg.counts_as_activity());
        assert!(msg.is_confirmed());
    }

    #[test]
    fn test_message_serde_round_trip() {
        let msg = Message::received(
            MessageId(42),
            channel(),
            UserId::new("bob"),
            MessageBody::File {
                file_name: "photo.png".into(),
                mime_type: "image/png".into(),
                file_size: 1024,
            },
            Utc::now(),
        );

        let json = serde_json::to_string(&msg).unwrap();
        let restored: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, restored);
    }
}
