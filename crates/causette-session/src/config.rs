//! Session tuning parameters.
//!
//! All settings have defaults that work out of the box; embedders override
//! them when the host application needs different paging or buffering.

use causette_shared::constants::{DEFAULT_PAGE_SIZE, SESSION_CHANNEL_CAPACITY};

/// Configuration for spawning a channel session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Number of messages requested per page.
    /// Default: `DEFAULT_PAGE_SIZE`.
    pub page_size: usize,

    /// Capacity of the command and notification channels.
    /// Default: `SESSION_CHANNEL_CAPACITY`.
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            channel_capacity: SESSION_CHANNEL_CAPACITY,
        }
    }
}
