//! Ownership of the shared outbox and the set of open channel sessions.
//!
//! A pending send must outlive the view that created it, so the outbox
//! cannot belong to any single session.  The manager owns it, hands each
//! session a cloned handle, and keeps the command senders of every open
//! session so channels can be closed or re-addressed later.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, info};

use causette_shared::{ChannelUrl, UserId};
use causette_timeline::Outbox;

use crate::config::SessionConfig;
use crate::session::{
    spawn_session, BackendEvent, BackendRequest, SessionCommand, SessionNotification,
};

pub struct SessionManager {
    sender_id: UserId,
    config: SessionConfig,
    outbox: Outbox,
    sessions: HashMap<ChannelUrl, mpsc::Sender<SessionCommand>>,
}

impl SessionManager {
    pub fn new(sender_id: UserId, config: SessionConfig) -> Self {
        Self {
            sender_id,
            config,
            outbox: Outbox::new(),
            sessions: HashMap::new(),
        }
    }

    /// Handle to the shared outbox.
    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }

    /// Spawn a session for `channel_url` wired to the given backend
    /// channels.  Fails if a session for the channel is already open.
    pub fn open(
        &mut self,
        channel_url: ChannelUrl,
        backend_tx: mpsc::Sender<BackendRequest>,
        backend_rx: mpsc::Receiver<BackendEvent>,
    ) -> anyhow::Result<(
        mpsc::Sender<SessionCommand>,
        mpsc::Receiver<SessionNotification>,
    )> {
        self.prune_closed();
        if self.sessions.contains_key(&channel_url) {
            anyhow::bail!("a session for {channel_url} is already open");
        }

        let (commands, notifications) = spawn_session(
            channel_url.clone(),
            self.sender_id.clone(),
            self.outbox.clone(),
            self.config.clone(),
            backend_tx,
            backend_rx,
        );
        info!(channel = %channel_url, "channel session opened");
        self.sessions.insert(channel_url, commands.clone());
        Ok((commands, notifications))
    }

    /// Ask a session to shut down.  Its pending sends stay in the outbox
    /// and reappear when the channel is opened again.
    pub async fn close(&mut self, channel_url: &ChannelUrl) -> bool {
        match self.sessions.remove(channel_url) {
            Some(commands) => {
                debug!(channel = %channel_url, "closing channel session");
                commands.send(SessionCommand::Shutdown).await.is_ok()
            }
            None => false,
        }
    }

    /// Command sender of an open session, if any.
    pub fn commands(&self, channel_url: &ChannelUrl) -> Option<mpsc::Sender<SessionCommand>> {
        self.sessions
            .get(channel_url)
            .filter(|tx| !tx.is_closed())
            .cloned()
    }

    pub fn is_open(&self, channel_url: &ChannelUrl) -> bool {
        self.commands(channel_url).is_some()
    }

    fn prune_closed(&mut self) {
        self.sessions.retain(|_, tx| !tx.is_closed());
    }
}
