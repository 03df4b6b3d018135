use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::Arc;

use super::planner::{plan_merges, ReallocationPlanner};
use super::reallocation_model::{ReallocationOutcome, ReallocationSummary};
use super::reallocation_traits::PaymentReallocationServiceTrait;
use crate::balances::{
    BalanceItem, BalanceItemRepositoryTrait, BalanceItemServiceTrait, NewPayment,
    PaymentRepositoryTrait, ReceivableBalanceType,
};
use crate::errors::{ReallocationError, Result};
use crate::settings::ReallocationSettings;

/// Moves credit of canceled or overpaid balance items onto items that are
/// still open, within one receivable.
pub struct PaymentReallocationService {
    settings: ReallocationSettings,
    balance_items: Arc<dyn BalanceItemRepositoryTrait>,
    payments: Arc<dyn PaymentRepositoryTrait>,
    balance_item_service: Arc<dyn BalanceItemServiceTrait>,
}

impl PaymentReallocationService {
    pub fn new(
        settings: ReallocationSettings,
        balance_items: Arc<dyn BalanceItemRepositoryTrait>,
        payments: Arc<dyn PaymentRepositoryTrait>,
        balance_item_service: Arc<dyn BalanceItemServiceTrait>,
    ) -> Self {
        Self {
            settings,
            balance_items,
            payments,
            balance_item_service,
        }
    }

    /// Outstanding items of the receivable that are past their due date.
    fn load_overdue(
        &self,
        organization_id: &str,
        object_id: &str,
        object_type: ReceivableBalanceType,
    ) -> Result<(Vec<BalanceItem>, Vec<BalanceItem>)> {
        let now = Utc::now();
        let items = self
            .balance_items
            .list_outstanding(organization_id, object_type, object_id)?;
        let overdue = items
            .iter()
            .filter(|item| item.is_after_due_date(now))
            .cloned()
            .collect();
        Ok((items, overdue))
    }

    /// Merges duplicates into their Due counterpart. Returns the number of merged items.
    async fn merge_duplicates(&self, items: &[BalanceItem], overdue: &[BalanceItem]) -> Result<usize> {
        let merges = plan_merges(items, overdue);
        if merges.is_empty() {
            return Ok(0);
        }

        let mut touched: HashSet<&str> = HashSet::new();
        let mut merged_items = 0;
        for merge in &merges {
            let moved = self
                .balance_items
                .merge_payments(&merge.into_id, &merge.from_ids)
                .await?;
            debug!(
                "Merged {} payment rows of {:?} into balance item {}",
                moved, merge.from_ids, merge.into_id
            );
            merged_items += merge.from_ids.len();
            touched.insert(merge.into_id.as_str());
            touched.extend(merge.from_ids.iter().map(String::as_str));
        }

        let touched_items: Vec<BalanceItem> = overdue
            .iter()
            .filter(|item| touched.contains(item.id.as_str()))
            .cloned()
            .collect();
        self.balance_item_service
            .update_paid_and_pending(&touched_items)
            .await?;
        Ok(merged_items)
    }
}

#[async_trait]
impl PaymentReallocationServiceTrait for PaymentReallocationService {
    async fn reallocate(
        &self,
        organization_id: &str,
        object_id: &str,
        object_type: ReceivableBalanceType,
    ) -> Result<ReallocationOutcome> {
        if !self.settings.is_enabled() {
            warn!(
                "Payment reallocation is disabled in {}, skipping {} {}",
                self.settings.environment, object_type, object_id
            );
            return Ok(ReallocationOutcome::Disabled);
        }

        let (items, mut overdue) = self.load_overdue(organization_id, object_id, object_type)?;
        let merged_items = self.merge_duplicates(&items, &overdue).await?;
        if merged_items > 0 {
            overdue = self.load_overdue(organization_id, object_id, object_type)?.1;
        }

        let ids: Vec<String> = overdue.iter().map(|item| item.id.clone()).collect();
        let rows = self.balance_items.load_payments(&ids)?;
        let plan = ReallocationPlanner::new(overdue.clone(), rows).plan();

        if plan.is_empty() {
            if merged_items == 0 {
                return Ok(ReallocationOutcome::NothingToDo);
            }
            return Ok(ReallocationOutcome::Completed(ReallocationSummary {
                merged_items,
                ..ReallocationSummary::default()
            }));
        }

        // Nothing is written unless the credit nets out.
        let total = plan.credit_total();
        if total != 0 {
            return Err(ReallocationError::Unbalanced { total }.into());
        }
        if let Some((unknown, _)) = plan
            .credits
            .iter()
            .find(|(id, _)| !overdue.iter().any(|item| &item.id == id))
        {
            return Err(ReallocationError::UnknownBalanceItem(unknown.clone()).into());
        }

        let moved_rows = plan.row_changes.len();
        if moved_rows > 0 {
            self.payments
                .apply_join_row_changes(plan.row_changes.clone())
                .await?;
        }

        let credit_rows = plan.credit_rows(organization_id);
        let mut reallocation_payment_id = None;
        if !credit_rows.is_empty() {
            let (payment, rows) = self
                .payments
                .create_with_rows(NewPayment::reallocation(organization_id, Utc::now()), credit_rows)
                .await?;
            debug!(
                "Created reallocation payment {} with {} rows",
                payment.id,
                rows.len()
            );
            reallocation_payment_id = Some(payment.id);
        }

        let touched: Vec<BalanceItem> = overdue
            .into_iter()
            .filter(|item| plan.touched_ids.contains(&item.id))
            .collect();
        let updated = self
            .balance_item_service
            .update_paid_and_pending(&touched)
            .await?;

        info!(
            "Reallocated {} {}: {} matches, {} row changes, {} items updated",
            object_type,
            object_id,
            plan.matches.len(),
            moved_rows,
            updated.len()
        );

        Ok(ReallocationOutcome::Completed(ReallocationSummary {
            merged_items,
            moved_rows,
            matches: plan.matches.len(),
            reallocation_payment_id,
            updated_items: updated.into_iter().map(|item| item.id).collect(),
        }))
    }

    async fn reallocate_for_items(
        &self,
        items: &[BalanceItem],
        organization_id: &str,
    ) -> Result<Vec<ReallocationOutcome>> {
        let mut targets: Vec<(ReceivableBalanceType, &str)> = Vec::new();
        for object_type in [
            ReceivableBalanceType::Member,
            ReceivableBalanceType::Organization,
            ReceivableBalanceType::User,
        ] {
            for item in items {
                if let Some(object_id) = item.receivable_id(object_type) {
                    if !targets.contains(&(object_type, object_id)) {
                        targets.push((object_type, object_id));
                    }
                }
            }
        }

        let mut outcomes = Vec::with_capacity(targets.len());
        for (object_type, object_id) in targets {
            outcomes.push(self.reallocate(organization_id, object_id, object_type).await?);
        }
        Ok(outcomes)
    }
}
