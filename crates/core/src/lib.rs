//! Ledgerkeep Core - ledger models, cached balances and payment reallocation.
//!
//! This crate contains the ledger consistency logic: throttled refresh
//! queues, the balance item service and the reallocation engine.
//! It is database-agnostic and defines traits that are implemented
//! by the `storage-sqlite` crate.

pub mod balances;
pub mod constants;
pub mod errors;
pub mod events;
pub mod payments;
pub mod queue;
pub mod reallocation;
pub mod settings;
pub mod utils;

// Re-export common types from the balances module
pub use balances::*;

// Re-export error types
pub use errors::Error;
pub use errors::Result;
