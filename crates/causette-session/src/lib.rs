//! # causette-session
//!
//! Asynchronous session layer over the reconciliation core.  Each open
//! channel view runs as one tokio task that consumes user commands and
//! backend events and emits display notifications; the backend SDK and the
//! display layer are collaborators behind typed mpsc channels.

pub mod config;
pub mod manager;
pub mod session;

pub use config::SessionConfig;
pub use manager::SessionManager;
pub use session::{
    spawn_session, BackendEvent, BackendRequest, SessionCommand, SessionNotification,
};
