use async_trait::async_trait;

use crate::balances::{Payment, PaymentStatus};
use crate::errors::Result;

/// Trait for payment status operations
#[async_trait]
pub trait PaymentStatusServiceTrait: Send + Sync {
    /// Moves a payment to `status` and runs the side effects on every balance
    /// item it pays for. Returns the stored payment.
    async fn handle_status_update(
        &self,
        payment_id: &str,
        organization_id: &str,
        status: PaymentStatus,
    ) -> Result<Payment>;
}
