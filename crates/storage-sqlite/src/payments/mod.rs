//! SQLite storage implementation for payments and balance item payments.

mod model;
mod repository;


pub use model::{BalanceItemPaymentDB, PaymentDB};
pub use repository::PaymentRepository;
