//! SQLite storage implementation for Ledgerkeep.
//!
//! This crate provides all database-related functionality using Diesel ORM with SQLite.
//! It implements the repository traits defined in `ledgerkeep-core` and contains:
//! - Database connection pooling and the single writer actor
//! - Embedded Diesel migrations
//! - Repository implementations for balance items, payments, cached balances
//!   and member to user links
//! - Database-specific model types (with Diesel derives)
//!
//! # Architecture
//!
//! This crate is the only place in the workspace where Diesel dependencies exist.
//! The core crate is database-agnostic and works with traits.
//!
//! ```text
//!   core (ledger domain, queues, services)
//!                  │
//!                  ▼
//!          storage-sqlite (this crate)
//!                  │
//!                  ▼
//!              SQLite DB
//! ```

pub mod db;
pub mod errors;
pub mod schema;
pub mod utils;

// Repository implementations
pub mod balance_items;
pub mod cached_balances;
pub mod member_users;
pub mod payments;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export database utilities
pub use db::{
    create_pool, get_connection, init, run_migrations, spawn_writer, DbConnection, DbPool,
    WriteHandle,
};

// Re-export storage errors and conversion helpers
pub use errors::{IntoCore, StorageError};

pub use balance_items::BalanceItemRepository;
pub use cached_balances::CachedBalanceRepository;
pub use member_users::MemberUserRepository;
pub use payments::PaymentRepository;

// Re-export from ledgerkeep-core for convenience
pub use ledgerkeep_core::errors::{DatabaseError, Error, Result};
