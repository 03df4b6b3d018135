use std::time::Duration;

/// Items held by a throttled queue before it flushes without waiting for the timer.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Maximum time an item waits in a throttled queue before being flushed.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Days ahead of today that still count as "due" for cached balances.
pub const DUE_OFFSET_DAYS: i64 = 7;

/// Relation mismatches tolerated when merging duplicate balance items.
pub const MERGE_RELATION_TOLERANCE: usize = 0;
