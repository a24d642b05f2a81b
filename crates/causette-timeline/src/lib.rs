//! # causette-timeline
//!
//! Synchronous reconciliation core for a channel's message list: the
//! confirmed window and its derived display view, the pagination state
//! machine, visual grouping derivation, and the shared outbox of pending
//! sends.  Everything here is plain state mutation; the async session layer
//! in `causette-session` decides when results reach the display.

pub mod grouping;
pub mod outbox;
pub mod pager;
pub mod timeline;

pub use grouping::{group_position, GroupPosition};
pub use outbox::Outbox;
pub use pager::{LoadDirection, Pager, PagerState};
pub use timeline::{EmptyState, Timeline};
