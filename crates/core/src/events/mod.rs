//! Ledger events.
//!
//! Storage adapters and upstream services emit these after a successful write
//! so that cached balances can be rescheduled.

mod ledger_event;
mod sink;

pub use ledger_event::*;
pub use sink::*;
