//! SQLite storage implementation for balance items.

mod model;
mod repository;


pub use model::{decode_relations, encode_relations, BalanceItemDB};
pub use repository::BalanceItemRepository;
pub(crate) use repository::receivable_query;
