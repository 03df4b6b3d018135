//! SQLite storage implementation for cached balances.

mod model;
mod repository;


pub use model::CachedBalanceDB;
pub use repository::CachedBalanceRepository;
