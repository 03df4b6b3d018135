use async_trait::async_trait;

use super::reallocation_model::ReallocationOutcome;
use crate::balances::{BalanceItem, ReceivableBalanceType};
use crate::errors::Result;

/// Trait for payment reallocation operations
#[async_trait]
pub trait PaymentReallocationServiceTrait: Send + Sync {
    /// Reconciles credit and open amounts of one receivable.
    async fn reallocate(
        &self,
        organization_id: &str,
        object_id: &str,
        object_type: ReceivableBalanceType,
    ) -> Result<ReallocationOutcome>;

    /// Runs [`Self::reallocate`] for every member, paying organization and user of `items`.
    async fn reallocate_for_items(
        &self,
        items: &[BalanceItem],
        organization_id: &str,
    ) -> Result<Vec<ReallocationOutcome>>;
}
