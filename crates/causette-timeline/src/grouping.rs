//! Visual grouping of consecutive same-sender messages.
//!
//! Messages from one sender within one time bucket render as a single
//! cluster so the sender name and timestamp decoration appear once.

use serde::{Deserialize, Serialize};

use causette_shared::constants::GROUPING_BUCKET_SECS;
use causette_shared::Message;

/// Position of a message within its visual cluster.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GroupPosition {
    /// Ungrouped: rendered with full decoration.
    None,
    /// Chronologically first message of a cluster.
    Top,
    Middle,
    /// Chronologically last message of a cluster.
    Bottom,
}

fn bucket(message: &Message) -> i64 {
    message.created_at.timestamp().div_euclid(GROUPING_BUCKET_SECS)
}

fn same_cluster(a: &Message, b: &Message) -> bool {
    a.sender_id == b.sender_id && bucket(a) == bucket(b)
}

/// Derive the cluster position of `view[index]`.
///
/// `view` is the display ordering (newest first), so the chronological
/// predecessor of an entry sits at a higher index and its successor at a
/// lower one.  Failed and canceled entries are skipped when looking up
/// neighbors and are themselves always ungrouped.
pub fn group_position(view: &[Message], index: usize) -> GroupPosition {
    let Some(message) = view.get(index) else {
        return GroupPosition::None;
    };
    if !message.participates_in_grouping() {
        return GroupPosition::None;
    }

    let earlier = view[index + 1..]
        .iter()
        .find(|m| m.participates_in_grouping());
    let later = view[..index]
        .iter()
        .rev()
        .find(|m| m.participates_in_grouping());

    let joins_earlier = earlier.is_some_and(|m| same_cluster(message, m));
    let joins_later = later.is_some_and(|m| same_cluster(message, m));

    match (joins_earlier, joins_later) {
        (false, false) => GroupPosition::None,
        (false, true) => GroupPosition::Top,
        (true, true) => GroupPosition::Middle,
        (true, false) => GroupPosition::Bottom,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use causette_shared::{ChannelUrl, MessageBody, MessageId, SendingStatus, UserId};
    use chrono::{TimeZone, Utc};

    fn msg(id: i64, sender: &str, ts: i64) -> Message {
        Message::received(
            MessageId(id),
            ChannelUrl::new("channel/test"),
            UserId::new(sender),
            MessageBody::User {
                text: format!("m{id}"),
            },
            Utc.timestamp_opt(ts, 0).unwrap(),
        )
    }

    #[test]
    fn test_same_sender_same_minute_clusters() {
        // Newest first: m3 (t=30) .. m1 (t=10), all inside one bucket.
        let view = vec![msg(3, "alice", 30), msg(2, "alice", 20), msg(1, "alice", 10)];

        assert_eq!(group_position(&view, 2), GroupPosition::Top);
        assert_eq!(group_position(&view, 1), GroupPosition::Middle);
        assert_eq!(group_position(&view, 0), GroupPosition::Bottom);
    }

    #[test]
    fn test_sender_change_breaks_cluster() {
        let view = vec![msg(3, "bob", 30), msg(2, "alice", 20), msg(1, "alice", 10)];

        assert_eq!(group_position(&view, 0), GroupPosition::None);
        assert_eq!(group_position(&view, 1), GroupPosition::Bottom);
        assert_eq!(group_position(&view, 2), GroupPosition::Top);
    }

    #[test]
    fn test_bucket_boundary_breaks_cluster() {
        // 59s and 61s fall into different minute buckets.
        let view = vec![msg(2, "alice", 61), msg(1, "alice", 59)];

        assert_eq!(group_position(&view, 0), GroupPosition::None);
        assert_eq!(group_position(&view, 1), GroupPosition::None);
    }

    #[test]
    fn test_failed_message_is_transparent() {
        let mut failed = msg(0, "alice", 25);
        failed.message_id = None;
        failed.request_id = Some(causette_shared::RequestId::generate());
        failed.sending_status = SendingStatus::Failed;

        // Failed entry sits between m2 and m3 in display order.
        let view = vec![
            msg(3, "alice", 30),
            failed,
            msg(2, "alice", 20),
            msg(1, "alice", 10),
        ];

        assert_eq!(group_position(&view, 1), GroupPosition::None);
        // Its neighbors still see each other.
        assert_eq!(group_position(&view, 0), GroupPosition::Bottom);
        assert_eq!(group_position(&view, 2), GroupPosition::Middle);
        assert_eq!(group_position(&view, 3), GroupPosition::Top);
    }

    #[test]
    fn test_lone_message_is_ungrouped() {
        let view = vec![msg(1, "alice", 10)];
        assert_eq!(group_position(&view, 0), GroupPosition::None);
        assert_eq!(group_position(&view, 5), GroupPosition::None);
    }
}
