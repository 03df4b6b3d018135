//! SQLite storage implementation for member to user links.

mod model;
mod repository;

pub use model::MemberUserDB;
pub use repository::MemberUserRepository;
