use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use log::{debug, info};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::payments_traits::PaymentStatusServiceTrait;
use crate::balances::{
    BalanceItem, BalanceItemRepositoryTrait, BalanceItemServiceTrait, Payment,
    PaymentRepositoryTrait, PaymentStatus,
};
use crate::errors::Result;

/// Applies payment status changes to balance items.
///
/// Updates for one organization are serialized so two payments settling the
/// same item never interleave their side effects.
pub struct PaymentStatusService {
    payments: Arc<dyn PaymentRepositoryTrait>,
    balance_items: Arc<dyn BalanceItemRepositoryTrait>,
    balance_item_service: Arc<dyn BalanceItemServiceTrait>,
    organization_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PaymentStatusService {
    pub fn new(
        payments: Arc<dyn PaymentRepositoryTrait>,
        balance_items: Arc<dyn BalanceItemRepositoryTrait>,
        balance_item_service: Arc<dyn BalanceItemServiceTrait>,
    ) -> Self {
        Self {
            payments,
            balance_items,
            balance_item_service,
            organization_locks: DashMap::new(),
        }
    }

    fn organization_lock(&self, organization_id: &str) -> Arc<Mutex<()>> {
        self.organization_locks
            .entry(organization_id.to_string())
            .or_default()
            .clone()
    }

    /// Balance items linked to the payment, with freshly recomputed amounts.
    async fn load_items(&self, payment: &Payment) -> Result<Vec<BalanceItem>> {
        let rows = self.payments.list_balance_item_payments(&payment.id)?;
        let mut ids: Vec<String> = Vec::with_capacity(rows.len());
        for row in rows {
            if !ids.contains(&row.balance_item_id) {
                ids.push(row.balance_item_id);
            }
        }
        let items = self.balance_items.get_by_ids(&ids)?;
        self.balance_item_service.update_paid_and_pending(&items).await
    }

    async fn apply_succeeded(&self, payment: &Payment, items: Vec<BalanceItem>) -> Result<()> {
        for mut item in items {
            if item.is_paid() {
                self.balance_item_service
                    .mark_paid(&mut item, Some(payment))
                    .await?;
            } else {
                self.balance_item_service.mark_due(&mut item).await?;
                self.balance_item_service
                    .mark_updated(&item, Some(payment))
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentStatusServiceTrait for PaymentStatusService {
    async fn handle_status_update(
        &self,
        payment_id: &str,
        organization_id: &str,
        status: PaymentStatus,
    ) -> Result<Payment> {
        let lock = self.organization_lock(organization_id);
        let _guard = lock.lock().await;

        let payment = self.payments.get_by_id(payment_id)?;
        if payment.status == status {
            debug!("Payment {} is already {}", payment_id, status);
            return Ok(payment);
        }

        let old_status = payment.status;
        let paid_at = (status == PaymentStatus::Succeeded).then(Utc::now);
        let payment = self
            .payments
            .update_status(payment_id, status, paid_at)
            .await?;
        info!(
            "Payment {} moved from {} to {}",
            payment_id, old_status, status
        );

        let items = self.load_items(&payment).await?;

        if status == PaymentStatus::Succeeded {
            self.apply_succeeded(&payment, items).await?;
        } else {
            if old_status == PaymentStatus::Succeeded {
                for item in &items {
                    self.balance_item_service
                        .undo_paid(item, Some(&payment))
                        .await?;
                }
            }
            if status == PaymentStatus::Failed {
                for mut item in items.iter().cloned() {
                    self.balance_item_service
                        .mark_failed(&mut item, Some(&payment))
                        .await?;
                }
            }
            if old_status == PaymentStatus::Failed {
                for item in &items {
                    self.balance_item_service
                        .undo_failed(item, Some(&payment))
                        .await?;
                }
            }
        }

        self.balance_item_service.flush_caches(organization_id).await;
        Ok(payment)
    }
}
