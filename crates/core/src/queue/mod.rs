//! Debounced batching primitives used to coalesce recompute signals.

mod grouped_throttled_queue;
mod throttled_queue;



pub use grouped_throttled_queue::{GroupedBatchHandler, GroupedThrottledQueue};
pub use throttled_queue::{split_batches, BatchHandler, EmptyHandler, ThrottledQueue};
