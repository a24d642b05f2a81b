/// Default number of messages requested per page
pub const DEFAULT_PAGE_SIZE: usize = 30;

/// Width of the visual grouping bucket in seconds: consecutive messages from
/// the same sender inside one bucket render as a single cluster
pub const GROUPING_BUCKET_SECS: i64 = 60;

/// Capacity of the session command and notification channels
pub const SESSION_CHANNEL_CAPACITY: usize = 256;
