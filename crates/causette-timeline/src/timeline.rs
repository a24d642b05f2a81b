//! Channel timeline reconciliation.
//!
//! A [`Timeline`] owns the confirmed message list for one open channel view
//! and derives the display view by merging in a snapshot of the channel's
//! pending sends (see [`Outbox`](crate::Outbox)).  All operations are
//! synchronous: the session task around it decides when to refresh the
//! display, keeping state mutation and rendering side effects apart.
//!
//! Deduplication is structural rather than a post-pass: `upsert` removes any
//! entry with the same effective identity before appending, and pending
//! entries are removed from the outbox in the same turn their confirmation
//! is upserted.  The merge itself is a plain stable sort + concatenation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use causette_shared::{Message, MessageId, RequestId};

use crate::pager::Pager;

/// What the display should show when the view itself is empty.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmptyState {
    /// Nothing special: messages are visible or still loading.
    None,
    /// Loaded successfully and the channel has no messages.
    NoMessages,
    /// The initial load failed.
    Error,
}

/// Reconciled message state for one open channel view.
///
/// Holds the backend-acknowledged window, the derived display view, the
/// pagination state machine, and the viewer-position bookkeeping used to
/// keep the scroll anchor content-relative.
#[derive(Debug, Clone)]
pub struct Timeline {
    confirmed: Vec<Message>,
    view: Vec<Message>,
    pager: Pager,
    read_anchor: Option<usize>,
    new_message_count: usize,
    first_visible_index: usize,
    at_latest: bool,
    editing: Option<MessageId>,
    loaded_once: bool,
    load_failed: bool,
}

impl Timeline {
    pub fn new(page_size: usize) -> Self {
        Self {
            confirmed: Vec::new(),
            view: Vec::new(),
            pager: Pager::new(page_size),
            read_anchor: None,
            new_message_count: 0,
            first_visible_index: 0,
            at_latest: true,
            editing: None,
            loaded_once: false,
            load_failed: false,
        }
    }

    /// Clear everything and enter the initial-loading state.
    pub fn reset(&mut self, from_latest: bool) {
        self.confirmed.clear();
        self.view.clear();
        self.pager.begin_initial(from_latest);
        self.read_anchor = None;
        self.new_message_count = 0;
        self.editing = None;
        self.loaded_once = false;
        self.load_failed = false;
    }

    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    pub fn pager_mut(&mut self) -> &mut Pager {
        &mut self.pager
    }

    /// Merge a batch of messages into the confirmed window.
    ///
    /// Remove-then-append per effective identity: the most recently touched
    /// entry becomes logically last, which decides ties when timestamps
    /// collide in the sorted view.  With `count_activity`, user/file
    /// messages advance the new-message counter, and the read anchor is
    /// recomputed while the viewer is scrolled away and no load is in
    /// flight.
    pub fn upsert(&mut self, messages: Vec<Message>, count_activity: bool, pending: &[Message]) {
        for message in messages {
            let Some(key) = message.key() else {
                debug!(channel = %message.channel_url, "dropping message without identity");
                continue;
            };
            if count_activity && message.counts_as_activity() {
                self.new_message_count += 1;
                if !self.at_latest && !self.pager.is_loading() {
                    self.read_anchor = Some(self.first_visible_index + 1);
                }
            }
            self.confirmed.retain(|m| m.key().as_ref() != Some(&key));
            self.confirmed.push(message);
        }
        self.rebuild_view(pending);
    }

    /// Remove confirmed entries by server id.
    ///
    /// Cancels edit mode if the edited message is among them.  Returns the
    /// request ids of the removed entries so the caller can purge stale
    /// pending echoes of the same sends; entries without a request id never
    /// touch the outbox.
    pub fn delete(&mut self, message_ids: &[MessageId], pending: &[Message]) -> Vec<RequestId> {
        if let Some(editing) = self.editing {
            if message_ids.contains(&editing) {
                debug!(message_id = %editing, "edited message deleted, leaving edit mode");
                self.editing = None;
            }
        }

        let mut indices = Vec::new();
        let mut request_ids = Vec::new();
        for (i, message) in self.confirmed.iter().enumerate() {
            if message
                .message_id
                .is_some_and(|id| message_ids.contains(&id))
            {
                indices.push(i);
                if let Some(request_id) = &message.request_id {
                    request_ids.push(request_id.clone());
                }
            }
        }

        // Descending order keeps the remaining indices valid while removing.
        for i in indices.into_iter().rev() {
            self.confirmed.remove(i);
        }

        self.rebuild_view(pending);
        request_ids
    }

    /// Replace edited messages in place, preserving their position.
    ///
    /// Edits do not change `created_at`, so re-sorting would be a no-op;
    /// unlike `upsert` this must not disturb tie-break ordering either.
    /// Unknown ids are ignored: the window is a sliding cache, not the
    /// source of truth.
    pub fn mark_updated(&mut self, messages: Vec<Message>, pending: &[Message]) {
        for message in messages {
            let Some(id) = message.message_id else {
                debug!("ignoring update without a server id");
                continue;
            };
            match self.confirmed.iter_mut().find(|m| m.message_id == Some(id)) {
                Some(slot) => *slot = message,
                None => debug!(message_id = %id, "update outside the loaded window"),
            }
        }
        self.rebuild_view(pending);
    }

    /// Replace one reaction entry in place.  An empty user set removes the
    /// emoji key entirely.  Unknown ids are ignored.
    pub fn apply_reaction(
        &mut self,
        message_id: MessageId,
        emoji_key: &str,
        user_ids: std::collections::BTreeSet<causette_shared::UserId>,
        pending: &[Message],
    ) {
        match self
            .confirmed
            .iter_mut()
            .find(|m| m.message_id == Some(message_id))
        {
            Some(slot) => {
                if user_ids.is_empty() {
                    slot.reactions.remove(emoji_key);
                } else {
                    slot.reactions.insert(emoji_key.to_string(), user_ids);
                }
                self.rebuild_view(pending);
            }
            None => debug!(message_id = %message_id, "reaction outside the loaded window"),
        }
    }

    /// Recompute the display view.
    ///
    /// Pending entries (newest first) always precede confirmed entries
    /// (newest first): a pending message is by definition just-sent.  Both
    /// sorts are stable so equal timestamps keep their relative order.  No
    /// dedup pass runs here; see the module docs.
    pub fn rebuild_view(&mut self, pending: &[Message]) {
        let mut merged: Vec<Message> = pending.to_vec();
        merged.sort_by_key(|m| std::cmp::Reverse(m.created_at));

        let mut confirmed = self.confirmed.clone();
        confirmed.sort_by_key(|m| std::cmp::Reverse(m.created_at));

        merged.extend(confirmed);
        self.view = merged;
    }

    /// The display ordering, newest first.
    pub fn view(&self) -> &[Message] {
        &self.view
    }

    /// Record the viewer's position as reported by the display layer.
    /// Reaching the newest position clears the anchor and the counter.
    pub fn set_viewport(&mut self, first_visible_index: usize, at_latest: bool) {
        self.first_visible_index = first_visible_index;
        self.at_latest = at_latest;
        if at_latest {
            self.read_anchor = None;
            self.new_message_count = 0;
        }
    }

    pub fn read_anchor(&self) -> Option<usize> {
        self.read_anchor
    }

    pub fn new_message_count(&self) -> usize {
        self.new_message_count
    }

    /// Index of the view entry closest to `at`, for restoring the viewer's
    /// position after an anchored initial load.
    pub fn index_nearest(&self, at: DateTime<Utc>) -> Option<usize> {
        self.view
            .iter()
            .enumerate()
            .min_by_key(|(_, m)| (m.created_at - at).num_milliseconds().abs())
            .map(|(i, _)| i)
    }

    /// Enter edit mode for a confirmed message.  Refused for ids outside
    /// the loaded window.
    pub fn begin_edit(&mut self, message_id: MessageId) -> bool {
        let known = self
            .confirmed
            .iter()
            .any(|m| m.message_id == Some(message_id));
        if known {
            self.editing = Some(message_id);
        } else {
            debug!(message_id = %message_id, "edit refused for unknown message");
        }
        known
    }

    pub fn cancel_edit(&mut self) {
        self.editing = None;
    }

    pub fn editing(&self) -> Option<MessageId> {
        self.editing
    }

    pub fn mark_initial_loaded(&mut self) {
        self.loaded_once = true;
        self.load_failed = false;
    }

    pub fn mark_initial_failed(&mut self) {
        self.load_failed = true;
    }

    pub fn empty_state(&self) -> EmptyState {
        if !self.view.is_empty() {
            EmptyState::None
        } else if self.load_failed {
            EmptyState::Error
        } else if self.loaded_once {
            EmptyState::NoMessages
        } else {
            EmptyState::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use causette_shared::{ChannelUrl, MessageBody, MessageKey, RequestId, UserId};
    use chrono::TimeZone;

    fn channel() -> ChannelUrl {
        ChannelUrl::new("channel/test")
    }

    fn msg(id: i64, ts: i64) -> Message {
        Message::received(
            MessageId(id),
            channel(),
            UserId::new("alice"),
            MessageBody::User {
                text: format!("m{id}"),
            },
            Utc.timestamp_opt(ts, 0).unwrap(),
        )
    }

    fn pending_msg(request_id: &str, ts: i64) -> Message {
        let mut message = Message::draft(
            channel(),
            UserId::new("alice"),
            MessageBody::User {
                text: request_id.to_string(),
            },
        );
        message.request_id = Some(RequestId(request_id.to_string()));
        message.created_at = Utc.timestamp_opt(ts, 0).unwrap();
        message
    }

    fn keys(timeline: &Timeline) -> Vec<MessageKey> {
        timeline.view().iter().filter_map(|m| m.key()).collect()
    }

    #[test]
    fn test_upsert_deduplicates_by_identity() {
        let mut timeline = Timeline::new(30);
        timeline.upsert(vec![msg(1, 100), msg(2, 200)], false, &[]);
        timeline.upsert(vec![msg(1, 100), msg(1, 100)], false, &[]);

        assert_eq!(timeline.view().len(), 2);
        let ids: Vec<_> = timeline.view().iter().map(|m| m.message_id).collect();
        assert_eq!(ids, vec![Some(MessageId(2)), Some(MessageId(1))]);
    }

    #[test]
    fn test_view_sorted_newest_first_with_pending_ahead() {
        let mut timeline = Timeline::new(30);
        // Pending older than every confirmed entry still renders first.
        let pending = vec![pending_msg("r1", 50)];
        timeline.upsert(vec![msg(1, 100), msg(2, 200)], false, &pending);

        let view = timeline.view();
        assert_eq!(view.len(), 3);
        assert_eq!(view[0].request_id, Some(RequestId("r1".into())));
        assert_eq!(view[1].message_id, Some(MessageId(2)));
        assert_eq!(view[2].message_id, Some(MessageId(1)));
    }

    #[test]
    fn test_upsert_tie_break_prefers_last_touched() {
        let mut timeline = Timeline::new(30);
        let mut a = msg(1, 100);
        a.body = MessageBody::User { text: "old".into() };
        let b = msg(2, 100);
        timeline.upsert(vec![a, b], false, &[]);

        // Re-touch message 1 with the same timestamp: it moves ahead of 2
        // in insertion order, and the stable sort keeps it there.
        let mut a2 = msg(1, 100);
        a2.body = MessageBody::User { text: "new".into() };
        timeline.upsert(vec![a2], false, &[]);

        let ids: Vec<_> = timeline.view().iter().map(|m| m.message_id).collect();
        assert_eq!(ids, vec![Some(MessageId(2)), Some(MessageId(1))]);
        match &timeline.view()[1].body {
            MessageBody::User { text } => assert_eq!(text, "new"),
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut timeline = Timeline::new(30);
        let batch = vec![msg(1, 100), msg(2, 200), msg(3, 300)];
        timeline.upsert(batch.clone(), false, &[]);
        let once = keys(&timeline);

        timeline.upsert(batch, false, &[]);
        assert_eq!(keys(&timeline), once);
    }

    #[test]
    fn test_delete_removes_correct_entry() {
        let mut timeline = Timeline::new(30);
        timeline.upsert(vec![msg(1, 100), msg(2, 200)], false, &[]);

        let purged = timeline.delete(&[MessageId(2)], &[]);
        assert!(purged.is_empty());
        assert_eq!(timeline.view().len(), 1);
        assert_eq!(timeline.view()[0].message_id, Some(MessageId(1)));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let mut timeline = Timeline::new(30);
        timeline.upsert(vec![msg(1, 100), msg(2, 200)], false, &[]);

        timeline.delete(&[MessageId(2)], &[]);
        timeline.delete(&[MessageId(2)], &[]);
        assert_eq!(timeline.view().len(), 1);
    }

    #[test]
    fn test_delete_reports_request_ids_of_removed_entries() {
        let mut timeline = Timeline::new(30);
        let mut confirmed = msg(7, 100);
        confirmed.request_id = Some(RequestId("r7".into()));
        timeline.upsert(vec![confirmed, msg(8, 200)], false, &[]);

        let purged = timeline.delete(&[MessageId(7), MessageId(8)], &[]);
        assert_eq!(purged, vec![RequestId("r7".into())]);
        assert!(timeline.view().is_empty());
    }

    #[test]
    fn test_delete_cancels_edit_of_deleted_message() {
        let mut timeline = Timeline::new(30);
        timeline.upsert(vec![msg(1, 100), msg(2, 200)], false, &[]);

        assert!(timeline.begin_edit(MessageId(2)));
        timeline.delete(&[MessageId(2)], &[]);
        assert_eq!(timeline.editing(), None);
    }

    #[test]
    fn test_delete_keeps_edit_of_other_message() {
        let mut timeline = Timeline::new(30);
        timeline.upsert(vec![msg(1, 100), msg(2, 200)], false, &[]);

        assert!(timeline.begin_edit(MessageId(1)));
        timeline.delete(&[MessageId(2)], &[]);
        assert_eq!(timeline.editing(), Some(MessageId(1)));
    }

    #[test]
    fn test_mark_updated_preserves_position() {
        let mut timeline = Timeline::new(30);
        timeline.upsert(vec![msg(1, 100), msg(2, 100), msg(3, 100)], false, &[]);
        let before: Vec<_> = timeline.view().iter().map(|m| m.message_id).collect();

        let mut edited = msg(2, 100);
        edited.body = MessageBody::User {
            text: "edited".into(),
        };
        edited.updated_at = Some(Utc.timestamp_opt(500, 0).unwrap());
        timeline.mark_updated(vec![edited], &[]);

        let after: Vec<_> = timeline.view().iter().map(|m| m.message_id).collect();
        assert_eq!(before, after);
        let slot = timeline
            .view()
            .iter()
            .find(|m| m.message_id == Some(MessageId(2)))
            .unwrap();
        match &slot.body {
            MessageBody::User { text } => assert_eq!(text, "edited"),
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_mark_updated_ignores_unknown_id() {
        let mut timeline = Timeline::new(30);
        timeline.upsert(vec![msg(1, 100)], false, &[]);

        timeline.mark_updated(vec![msg(99, 100)], &[]);
        assert_eq!(timeline.view().len(), 1);
        assert_eq!(timeline.view()[0].message_id, Some(MessageId(1)));
    }

    #[test]
    fn test_apply_reaction_sets_and_clears() {
        let mut timeline = Timeline::new(30);
        timeline.upsert(vec![msg(1, 100)], false, &[]);

        let users: std::collections::BTreeSet<_> =
            [UserId::new("bob"), UserId::new("carol")].into_iter().collect();
        timeline.apply_reaction(MessageId(1), "thumbsup", users.clone(), &[]);
        assert_eq!(
            timeline.view()[0].reactions.get("thumbsup"),
            Some(&users)
        );

        timeline.apply_reaction(MessageId(1), "thumbsup", Default::default(), &[]);
        assert!(timeline.view()[0].reactions.is_empty());
    }

    #[test]
    fn test_anchor_set_when_scrolled_away() {
        let mut timeline = Timeline::new(30);
        timeline.set_viewport(5, false);

        timeline.upsert(vec![msg(10, 1_000)], true, &[]);
        assert_eq!(timeline.read_anchor(), Some(6));
        assert_eq!(timeline.new_message_count(), 1);
    }

    #[test]
    fn test_anchor_not_set_at_latest_or_mid_load() {
        let mut timeline = Timeline::new(30);
        timeline.set_viewport(0, true);
        timeline.upsert(vec![msg(10, 1_000)], true, &[]);
        assert_eq!(timeline.read_anchor(), None);

        // Scrolled away but a load is in flight: counter advances, anchor
        // stays untouched.
        timeline.set_viewport(5, false);
        timeline.pager_mut().begin_initial(true);
        timeline.upsert(vec![msg(11, 1_100)], true, &[]);
        assert_eq!(timeline.read_anchor(), None);
        assert_eq!(timeline.new_message_count(), 1);
    }

    #[test]
    fn test_admin_messages_do_not_advance_counter() {
        let mut timeline = Timeline::new(30);
        timeline.set_viewport(5, false);

        let notice = Message::received(
            MessageId(1),
            channel(),
            UserId::new("system"),
            MessageBody::Admin {
                text: "bob joined".into(),
            },
            Utc.timestamp_opt(100, 0).unwrap(),
        );
        timeline.upsert(vec![notice], true, &[]);
        assert_eq!(timeline.new_message_count(), 0);
        assert_eq!(timeline.read_anchor(), None);
    }

    #[test]
    fn test_reaching_latest_clears_anchor_and_counter() {
        let mut timeline = Timeline::new(30);
        timeline.set_viewport(5, false);
        timeline.upsert(vec![msg(10, 1_000)], true, &[]);
        assert!(timeline.read_anchor().is_some());

        timeline.set_viewport(0, true);
        assert_eq!(timeline.read_anchor(), None);
        assert_eq!(timeline.new_message_count(), 0);
    }

    #[test]
    fn test_empty_state_transitions() {
        let mut timeline = Timeline::new(30);
        assert_eq!(timeline.empty_state(), EmptyState::None);

        timeline.mark_initial_failed();
        assert_eq!(timeline.empty_state(), EmptyState::Error);

        timeline.reset(true);
        timeline.mark_initial_loaded();
        assert_eq!(timeline.empty_state(), EmptyState::NoMessages);

        timeline.upsert(vec![msg(1, 100)], false, &[]);
        assert_eq!(timeline.empty_state(), EmptyState::None);
    }

    #[test]
    fn test_reset_clears_window_and_edit_mode() {
        let mut timeline = Timeline::new(30);
        timeline.upsert(vec![msg(1, 100)], false, &[]);
        assert!(timeline.begin_edit(MessageId(1)));

        timeline.reset(true);
        assert!(timeline.view().is_empty());
        assert_eq!(timeline.editing(), None);
        assert!(timeline.pager().is_loading());
    }

    #[test]
    fn test_index_nearest_picks_closest_timestamp() {
        let mut timeline = Timeline::new(30);
        timeline.upsert(vec![msg(1, 100), msg(2, 200), msg(3, 300)], false, &[]);

        // View is newest first: [300, 200, 100].
        let at = Utc.timestamp_opt(190, 0).unwrap();
        assert_eq!(timeline.index_nearest(at), Some(1));
        assert_eq!(Timeline::new(30).index_nearest(at), None);
    }
}
