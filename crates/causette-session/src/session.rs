//! Channel session with tokio mpsc command/notification pattern.
//!
//! One session task owns the reconciled timeline for one open channel view.
//! It consumes user commands and backend events, keeps the timeline
//! consistent, and emits display notifications.  All reconciliation happens
//! inside the task, so the timeline itself needs no locking; only the
//! shared [`Outbox`] is mutex-guarded.
//!
//! The backend SDK is a collaborator behind two channels: the session
//! issues [`BackendRequest`]s and consumes [`BackendEvent`]s.  It never
//! blocks on a response; every completion arrives as another event.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use causette_shared::{
    BackendError, ChannelUrl, Message, MessageBody, MessageId, RequestId, SendingStatus,
    SessionError, UserId,
};
use causette_timeline::{EmptyState, LoadDirection, Outbox, Timeline};

use crate::config::SessionConfig;

// ---------------------------------------------------------------------------
// Command / notification / backend types
// ---------------------------------------------------------------------------

/// Commands sent *into* the session task.
#[derive(Debug)]
pub enum SessionCommand {
    /// (Re)load the channel, optionally anchored at a timestamp.
    Open {
        starting_point: Option<DateTime<Utc>>,
    },
    /// Fetch the page preceding the oldest loaded message.
    LoadOlder,
    /// Fetch the page following the newest loaded message (catch-up).
    LoadNewer,
    /// Send a new message, optimistically visible immediately.
    Send { body: MessageBody },
    /// Retry a failed send under its original request id.
    Resend { request_id: RequestId },
    /// Drop a failed send without retrying.
    Discard { request_id: RequestId },
    /// Enter edit mode for a confirmed message.
    BeginEdit { message_id: MessageId },
    /// Leave edit mode.
    CancelEdit,
    /// Report the viewer's position so anchors stay content-relative.
    Viewport {
        first_visible_index: usize,
        at_latest: bool,
    },
    /// Tear the session down.  Pending sends stay in the outbox.
    Shutdown,
}

/// Events from the backend SDK *into* the session task.
#[derive(Debug)]
pub enum BackendEvent {
    InitialPageLoaded { messages: Vec<Message> },
    OlderPageLoaded { messages: Vec<Message> },
    /// Catch-up page after a reconnect.
    NewerPageLoaded { messages: Vec<Message> },
    /// Realtime delivery of freshly created messages.
    MessagesPushed { messages: Vec<Message> },
    MessageUpdated { message: Message },
    MessageDeleted { message_id: MessageId },
    ReactionUpdated {
        message_id: MessageId,
        emoji_key: String,
        user_ids: BTreeSet<UserId>,
    },
    SendCompleted {
        request_id: RequestId,
        result: Result<Message, BackendError>,
    },
    ResendCompleted {
        request_id: RequestId,
        result: Result<Message, BackendError>,
    },
    PageLoadFailed {
        direction: LoadDirection,
        error: BackendError,
    },
}

/// Fetch and send requests the session issues *to* the backend SDK.
#[derive(Debug)]
pub enum BackendRequest {
    LoadInitial {
        channel_url: ChannelUrl,
        around: Option<DateTime<Utc>>,
        limit: usize,
    },
    LoadOlder {
        channel_url: ChannelUrl,
        before: Option<DateTime<Utc>>,
        limit: usize,
    },
    LoadNewer {
        channel_url: ChannelUrl,
        after: Option<DateTime<Utc>>,
        limit: usize,
    },
    SendMessage { draft: Message },
    ResendMessage { draft: Message },
}

/// Notifications sent *from* the session task to the display layer.
#[derive(Debug, Clone, Serialize)]
pub enum SessionNotification {
    /// The display ordering changed; re-render from it.
    ViewChanged { messages: Vec<Message> },
    /// The scroll anchor changed (`None` = stick to newest).
    AnchorChanged { index: Option<usize> },
    EmptyStateChanged { state: EmptyState },
    /// Messages arrived while the viewer was scrolled away.
    NewMessageCount { count: usize },
    EditingChanged { message_id: Option<MessageId> },
    /// A terminal error to surface as a banner; nothing is retried.
    ErrorReported { error: SessionError },
}

// ---------------------------------------------------------------------------
// Session task
// ---------------------------------------------------------------------------

/// Spawn a channel session in a background tokio task.
///
/// Returns channels for sending commands and receiving display
/// notifications.  The task ends on [`SessionCommand::Shutdown`] or when
/// either inbound channel closes; the shared outbox is untouched by
/// teardown.
pub fn spawn_session(
    channel_url: ChannelUrl,
    sender_id: UserId,
    outbox: Outbox,
    config: SessionConfig,
    backend_tx: mpsc::Sender<BackendRequest>,
    mut backend_rx: mpsc::Receiver<BackendEvent>,
) -> (
    mpsc::Sender<SessionCommand>,
    mpsc::Receiver<SessionNotification>,
) {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<SessionCommand>(config.channel_capacity);
    let (notif_tx, notif_rx) = mpsc::channel::<SessionNotification>(config.channel_capacity);

    let mut session = Session {
        timeline: Timeline::new(config.page_size),
        page_size: config.page_size,
        channel_url,
        sender_id,
        outbox,
        backend_tx,
        notif_tx,
        open_at: None,
        last_anchor: None,
        last_empty: EmptyState::None,
        last_count: 0,
        last_editing: None,
    };

    tokio::spawn(async move {
        info!(channel = %session.channel_url, "channel session started");

        loop {
            tokio::select! {
                command = cmd_rx.recv() => {
                    match command {
                        Some(SessionCommand::Shutdown) => {
                            info!(channel = %session.channel_url, "session shutdown requested");
                            break;
                        }
                        Some(command) => session.handle_command(command).await,
                        None => {
                            info!(channel = %session.channel_url, "command channel closed, shutting down session");
                            break;
                        }
                    }
                }

                event = backend_rx.recv() => {
                    match event {
                        Some(event) => session.handle_backend_event(event).await,
                        None => {
                            info!(channel = %session.channel_url, "backend channel closed, shutting down session");
                            break;
                        }
                    }
                }
            }
        }

        info!(channel = %session.channel_url, "channel session terminated");
    });

    (cmd_tx, notif_rx)
}

struct Session {
    channel_url: ChannelUrl,
    sender_id: UserId,
    page_size: usize,
    outbox: Outbox,
    timeline: Timeline,
    backend_tx: mpsc::Sender<BackendRequest>,
    notif_tx: mpsc::Sender<SessionNotification>,
    /// Starting timestamp of an anchored open, kept until the initial page
    /// arrives so the viewer's position can be restored.
    open_at: Option<DateTime<Utc>>,
    last_anchor: Option<usize>,
    last_empty: EmptyState,
    last_count: usize,
    last_editing: Option<MessageId>,
}

impl Session {
    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Open { starting_point } => {
                debug!(channel = %self.channel_url, starting_point = ?starting_point, "opening channel");
                self.timeline.reset(starting_point.is_none());
                self.open_at = starting_point;
                self.publish_view().await;
                self.request(BackendRequest::LoadInitial {
                    channel_url: self.channel_url.clone(),
                    around: starting_point,
                    limit: self.page_size,
                })
                .await;
            }

            SessionCommand::LoadOlder => {
                if self.timeline.pager_mut().begin_older() {
                    let before = self.timeline.pager().older_cursor();
                    self.request(BackendRequest::LoadOlder {
                        channel_url: self.channel_url.clone(),
                        before,
                        limit: self.page_size,
                    })
                    .await;
                }
            }

            SessionCommand::LoadNewer => {
                if self.timeline.pager_mut().begin_newer() {
                    let after = self.timeline.pager().newer_cursor();
                    self.request(BackendRequest::LoadNewer {
                        channel_url: self.channel_url.clone(),
                        after,
                        limit: self.page_size,
                    })
                    .await;
                }
            }

            SessionCommand::Send { body } => {
                let draft = Message::draft(self.channel_url.clone(), self.sender_id.clone(), body);
                info!(
                    channel = %self.channel_url,
                    request_id = ?draft.request_id,
                    "sending message"
                );
                self.outbox.register(draft.clone()).await;
                self.refresh_view().await;
                self.request(BackendRequest::SendMessage { draft }).await;
            }

            SessionCommand::Resend { request_id } => {
                match self.outbox.get(&self.channel_url, &request_id).await {
                    Some(mut message) if message.is_resendable() => {
                        message.sending_status = SendingStatus::Pending;
                        self.outbox.register(message.clone()).await;
                        self.refresh_view().await;
                        self.request(BackendRequest::ResendMessage { draft: message })
                            .await;
                    }
                    Some(_) => {
                        warn!(request_id = %request_id, "resend refused: message not resendable");
                    }
                    None => {
                        warn!(request_id = %request_id, "resend refused: unknown request id");
                    }
                }
            }

            SessionCommand::Discard { request_id } => {
                if self.outbox.discard(&self.channel_url, &request_id).await {
                    debug!(request_id = %request_id, "pending message discarded");
                    self.refresh_view().await;
                }
            }

            SessionCommand::BeginEdit { message_id } => {
                self.timeline.begin_edit(message_id);
                self.publish_diffs().await;
            }

            SessionCommand::CancelEdit => {
                self.timeline.cancel_edit();
                self.publish_diffs().await;
            }

            SessionCommand::Viewport {
                first_visible_index,
                at_latest,
            } => {
                self.timeline.set_viewport(first_visible_index, at_latest);
                self.publish_diffs().await;
            }

            // Handled by the event loop before dispatching here.
            SessionCommand::Shutdown => {}
        }
    }

    async fn handle_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::InitialPageLoaded { messages } => {
                let pending = self.outbox.snapshot(&self.channel_url).await;
                self.timeline
                    .pager_mut()
                    .complete(LoadDirection::Initial, &messages);
                self.timeline.mark_initial_loaded();
                self.timeline.upsert(messages, false, &pending);
                self.publish_view().await;

                // Restore the viewer's position: the entry nearest the
                // requested starting point, or stick to newest.
                let index = self
                    .open_at
                    .take()
                    .and_then(|at| self.timeline.index_nearest(at));
                self.notify(SessionNotification::AnchorChanged { index })
                    .await;
            }

            BackendEvent::OlderPageLoaded { messages } => {
                let pending = self.outbox.snapshot(&self.channel_url).await;
                self.timeline
                    .pager_mut()
                    .complete(LoadDirection::Older, &messages);
                self.timeline.upsert(messages, false, &pending);
                self.publish_view().await;
            }

            BackendEvent::NewerPageLoaded { messages } => {
                let pending = self.outbox.snapshot(&self.channel_url).await;
                self.timeline
                    .pager_mut()
                    .complete(LoadDirection::Newer, &messages);
                self.timeline.upsert(messages, false, &pending);
                self.publish_view().await;
            }

            BackendEvent::MessagesPushed { messages } => {
                let pending = self.outbox.snapshot(&self.channel_url).await;
                self.timeline.upsert(messages, true, &pending);
                self.publish_view().await;
            }

            BackendEvent::MessageUpdated { message } => {
                let pending = self.outbox.snapshot(&self.channel_url).await;
                self.timeline.mark_updated(vec![message], &pending);
                self.publish_view().await;
            }

            BackendEvent::MessageDeleted { message_id } => {
                let pending = self.outbox.snapshot(&self.channel_url).await;
                let purged = self.timeline.delete(&[message_id], &pending);
                if !purged.is_empty() {
                    // The deleted message still had a pending echo; drop it
                    // too, then rebuild from the cleaned snapshot.
                    self.outbox.purge(&self.channel_url, &purged).await;
                    let pending = self.outbox.snapshot(&self.channel_url).await;
                    self.timeline.rebuild_view(&pending);
                }
                self.publish_view().await;
            }

            BackendEvent::ReactionUpdated {
                message_id,
                emoji_key,
                user_ids,
            } => {
                let pending = self.outbox.snapshot(&self.channel_url).await;
                self.timeline
                    .apply_reaction(message_id, &emoji_key, user_ids, &pending);
                self.publish_view().await;
            }

            BackendEvent::SendCompleted { request_id, result } => {
                self.finish_send(request_id, result, false).await;
            }

            BackendEvent::ResendCompleted { request_id, result } => {
                self.finish_send(request_id, result, true).await;
            }

            BackendEvent::PageLoadFailed { direction, error } => {
                warn!(channel = %self.channel_url, error = %error, "page load failed");
                self.timeline.pager_mut().fail();
                if direction == LoadDirection::Initial {
                    self.timeline.mark_initial_failed();
                    self.open_at = None;
                }
                self.notify(SessionNotification::ErrorReported {
                    error: SessionError::PageLoadFailed(error),
                })
                .await;
                self.publish_diffs().await;
            }
        }
    }

    async fn finish_send(
        &mut self,
        request_id: RequestId,
        result: Result<Message, BackendError>,
        resend: bool,
    ) {
        match result {
            Ok(confirmed) => {
                // The pending entry and its confirmation swap within this
                // one handler turn, so the view never shows both.
                self.outbox.complete(&self.channel_url, &request_id).await;
                let pending = self.outbox.snapshot(&self.channel_url).await;
                info!(
                    channel = %self.channel_url,
                    request_id = %request_id,
                    message_id = ?confirmed.message_id,
                    "send confirmed"
                );
                self.timeline.upsert(vec![confirmed], false, &pending);
                self.publish_view().await;
            }
            Err(error) => {
                warn!(
                    channel = %self.channel_url,
                    request_id = %request_id,
                    error = %error,
                    "send failed"
                );
                self.outbox.mark_failed(&self.channel_url, &request_id).await;
                let error = if resend {
                    SessionError::ResendFailed(error)
                } else {
                    SessionError::SendFailed(error)
                };
                self.notify(SessionNotification::ErrorReported { error })
                    .await;
                self.refresh_view().await;
            }
        }
    }

    /// Rebuild the view from a fresh outbox snapshot and publish it.
    async fn refresh_view(&mut self) {
        let pending = self.outbox.snapshot(&self.channel_url).await;
        self.timeline.rebuild_view(&pending);
        self.publish_view().await;
    }

    async fn publish_view(&mut self) {
        self.notify(SessionNotification::ViewChanged {
            messages: self.timeline.view().to_vec(),
        })
        .await;
        self.publish_diffs().await;
    }

    /// Emit anchor / empty-state / counter / edit-mode notifications when
    /// their value changed since the last publication.
    async fn publish_diffs(&mut self) {
        let anchor = self.timeline.read_anchor();
        if anchor != self.last_anchor {
            self.last_anchor = anchor;
            self.notify(SessionNotification::AnchorChanged { index: anchor })
                .await;
        }

        let empty = self.timeline.empty_state();
        if empty != self.last_empty {
            self.last_empty = empty;
            self.notify(SessionNotification::EmptyStateChanged { state: empty })
                .await;
        }

        let count = self.timeline.new_message_count();
        if count != self.last_count {
            self.last_count = count;
            self.notify(SessionNotification::NewMessageCount { count })
                .await;
        }

        let editing = self.timeline.editing();
        if editing != self.last_editing {
            self.last_editing = editing;
            self.notify(SessionNotification::EditingChanged {
                message_id: editing,
            })
            .await;
        }
    }

    async fn notify(&self, notification: SessionNotification) {
        if self.notif_tx.send(notification).await.is_err() {
            debug!(channel = %self.channel_url, "notification receiver dropped");
        }
    }

    async fn request(&self, request: BackendRequest) {
        if self.backend_tx.send(request).await.is_err() {
            warn!(channel = %self.channel_url, "backend request channel closed");
        }
    }
}
