//! Payments module - applies payment status transitions to the balance items a payment covers.

mod payment_status_service;
mod payments_traits;


pub use payment_status_service::PaymentStatusService;
pub use payments_traits::PaymentStatusServiceTrait;
