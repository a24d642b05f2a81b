//! Pagination state machine for a channel timeline.
//!
//! At most one load is in flight at a time; older/newer loads are refused
//! while anything else is pending or when the matching cursor side is
//! exhausted.  A failed load returns to idle without advancing cursors, so
//! the next scroll-triggered attempt retries naturally.

use chrono::{DateTime, Utc};
use tracing::debug;

use causette_shared::Message;

/// Which page a load targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadDirection {
    Initial,
    Older,
    Newer,
}

/// Current load activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagerState {
    Idle,
    LoadingInitial,
    LoadingOlder,
    LoadingNewer,
}

#[derive(Debug, Clone)]
pub struct Pager {
    state: PagerState,
    page_size: usize,
    /// Whether the current window was loaded from the latest message (as
    /// opposed to being anchored around an explicit starting timestamp).
    from_latest: bool,
    has_previous: bool,
    has_next: bool,
    oldest_loaded: Option<DateTime<Utc>>,
    newest_loaded: Option<DateTime<Utc>>,
}

impl Pager {
    pub fn new(page_size: usize) -> Self {
        Self {
            state: PagerState::Idle,
            page_size: page_size.max(1),
            from_latest: true,
            has_previous: false,
            has_next: false,
            oldest_loaded: None,
            newest_loaded: None,
        }
    }

    /// Enter `LoadingInitial`, dropping cursors and window flags.
    pub fn begin_initial(&mut self, from_latest: bool) {
        self.state = PagerState::LoadingInitial;
        self.from_latest = from_latest;
        self.has_previous = false;
        self.has_next = false;
        self.oldest_loaded = None;
        self.newest_loaded = None;
    }

    /// Try to enter `LoadingOlder`.  Refused unless idle with more history.
    pub fn begin_older(&mut self) -> bool {
        if self.state != PagerState::Idle || !self.has_previous {
            debug!(state = ?self.state, has_previous = self.has_previous, "older load refused");
            return false;
        }
        self.state = PagerState::LoadingOlder;
        true
    }

    /// Try to enter `LoadingNewer`.  Refused unless idle with more ahead.
    pub fn begin_newer(&mut self) -> bool {
        if self.state != PagerState::Idle || !self.has_next {
            debug!(state = ?self.state, has_next = self.has_next, "newer load refused");
            return false;
        }
        self.state = PagerState::LoadingNewer;
        true
    }

    /// Record a completed page and return to idle.
    ///
    /// A full page implies more may exist on that side; a short page means
    /// the side is exhausted.  A window loaded from the latest message never
    /// has anything newer until realtime delivery says otherwise.
    pub fn complete(&mut self, direction: LoadDirection, page: &[Message]) {
        let full = page.len() >= self.page_size;
        match direction {
            LoadDirection::Initial => {
                self.has_previous = full;
                self.has_next = !self.from_latest && full;
            }
            LoadDirection::Older => self.has_previous = full,
            LoadDirection::Newer => self.has_next = full,
        }
        self.advance_cursors(page);
        self.state = PagerState::Idle;
    }

    /// Abandon the in-flight load.  Cursors and window flags are untouched.
    pub fn fail(&mut self) {
        self.state = PagerState::Idle;
    }

    pub fn is_loading(&self) -> bool {
        self.state != PagerState::Idle
    }

    pub fn state(&self) -> PagerState {
        self.state
    }

    pub fn has_previous(&self) -> bool {
        self.has_previous
    }

    pub fn has_next(&self) -> bool {
        self.has_next
    }

    /// Timestamp to fetch strictly before when loading older history.
    pub fn older_cursor(&self) -> Option<DateTime<Utc>> {
        self.oldest_loaded
    }

    /// Timestamp to fetch strictly after when catching up.
    pub fn newer_cursor(&self) -> Option<DateTime<Utc>> {
        self.newest_loaded
    }

    fn advance_cursors(&mut self, page: &[Message]) {
        for message in page {
            if self.oldest_loaded.map_or(true, |t| message.created_at < t) {
                self.oldest_loaded = Some(message.created_at);
            }
            if self.newest_loaded.map_or(true, |t| message.created_at > t) {
                self.newest_loaded = Some(message.created_at);
            }
        }
    }
}
