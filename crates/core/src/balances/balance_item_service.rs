use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use log::{debug, info};
use std::collections::HashSet;
use std::sync::Arc;

use super::balances_model::{
    BalanceItem, BalanceItemStatus, BalanceItemType, Payment, ReceivableBalanceType,
};
use super::balances_traits::{
    BalanceItemRepositoryTrait, BalanceItemServiceTrait, CachedBalanceRepositoryTrait,
    LedgerHooksTrait, MemberUserRepositoryTrait, OrderState,
};
use crate::errors::Result;
use crate::events::{LedgerEvent, LedgerEventSink};
use crate::queue::{GroupedThrottledQueue, ThrottledQueue};
use crate::settings::{LedgerSettings, QueueSettings};
use crate::utils::time_utils::due_offset;

type RefreshQueue = GroupedThrottledQueue<String>;

/// Keeps cached balances in line with balance item changes and runs the
/// side effects of paid, failed and canceled items.
///
/// Refreshes are debounced per organization in four queues, one per
/// receivable kind. Call [`BalanceItemServiceTrait::flush_all`] before shutdown.
pub struct BalanceItemService {
    balance_items: Arc<dyn BalanceItemRepositoryTrait>,
    hooks: Arc<dyn LedgerHooksTrait>,
    member_queue: RefreshQueue,
    user_queue: RefreshQueue,
    organization_queue: RefreshQueue,
    registration_queue: RefreshQueue,
    bundle_discount_queue: ThrottledQueue<String>,
}

impl BalanceItemService {
    pub fn new(
        settings: &LedgerSettings,
        balance_items: Arc<dyn BalanceItemRepositoryTrait>,
        cached_balances: Arc<dyn CachedBalanceRepositoryTrait>,
        member_users: Arc<dyn MemberUserRepositoryTrait>,
        hooks: Arc<dyn LedgerHooksTrait>,
    ) -> Self {
        let queues = settings.queues;
        let tz = settings.timezone;

        let user_queue = refresh_queue(
            queues,
            cached_balances.clone(),
            ReceivableBalanceType::User,
            tz,
        );
        let organization_queue = refresh_queue(
            queues,
            cached_balances.clone(),
            ReceivableBalanceType::Organization,
            tz,
        );

        let member_queue = {
            let cached_balances = cached_balances.clone();
            let user_queue = user_queue.clone();
            GroupedThrottledQueue::new(queues, move |organization_id: String, member_ids: Vec<String>| {
                let cached_balances = cached_balances.clone();
                let member_users = member_users.clone();
                let user_queue = user_queue.clone();
                async move {
                    refresh(
                        cached_balances.as_ref(),
                        &organization_id,
                        ReceivableBalanceType::Member,
                        &member_ids,
                        tz,
                    )
                    .await?;

                    // Users aggregate their members' cached balances.
                    let user_ids = member_users.user_ids_for_members(&member_ids)?;
                    if !user_ids.is_empty() {
                        user_queue.add_items(&organization_id, user_ids);
                    }
                    Ok(())
                }
            })
        };

        let registration_queue = {
            let cached_balances = cached_balances.clone();
            let hooks = hooks.clone();
            GroupedThrottledQueue::new(
                queues,
                move |organization_id: String, registration_ids: Vec<String>| {
                    let cached_balances = cached_balances.clone();
                    let hooks = hooks.clone();
                    async move {
                        refresh(
                            cached_balances.as_ref(),
                            &organization_id,
                            ReceivableBalanceType::Registration,
                            &registration_ids,
                            tz,
                        )
                        .await?;
                        hooks
                            .update_documents_for_registrations(&organization_id, &registration_ids)
                            .await
                    }
                },
            )
        };

        let bundle_discount_queue = {
            let hooks = hooks.clone();
            ThrottledQueue::new(
                QueueSettings {
                    max_batch_size: queues.max_batch_size,
                    max_delay: None,
                },
                move |registration_ids: Vec<String>| {
                    let hooks = hooks.clone();
                    async move { hooks.update_bundle_discounts(&registration_ids).await }
                },
            )
        };

        Self {
            balance_items,
            hooks,
            member_queue,
            user_queue,
            organization_queue,
            registration_queue,
            bundle_discount_queue,
        }
    }

    async fn save(&self, item: &mut BalanceItem) -> Result<()> {
        *item = self.balance_items.save(item.clone()).await?;
        self.schedule_update(item);
        Ok(())
    }

    /// Adds the items a set depends on, as long as they are not part of it already.
    fn with_depending_items(&self, mut items: Vec<BalanceItem>) -> Result<Vec<BalanceItem>> {
        let known: HashSet<&str> = items.iter().map(|item| item.id.as_str()).collect();
        let mut depending_ids: Vec<String> = Vec::new();
        for item in &items {
            if let Some(id) = item.depending_balance_item_id.as_deref() {
                if !known.contains(id) && !depending_ids.iter().any(|known_id| known_id == id) {
                    depending_ids.push(id.to_string());
                }
            }
        }
        if depending_ids.is_empty() {
            return Ok(items);
        }
        let depending = self.balance_items.get_by_ids(&depending_ids)?;
        items.extend(depending);
        Ok(items)
    }

    /// Moves every item with status `from` to `to`. Returns all items, updated or not.
    async fn transition(
        &self,
        items: Vec<BalanceItem>,
        from: BalanceItemStatus,
        to: BalanceItemStatus,
    ) -> Result<Vec<BalanceItem>> {
        let ids: Vec<String> = items
            .iter()
            .filter(|item| item.status == from)
            .map(|item| item.id.clone())
            .collect();
        if ids.is_empty() {
            return Ok(items);
        }

        let updated = self.balance_items.set_status(&ids, to).await?;
        debug!("Moved {} balance items from {} to {}", updated.len(), from, to);

        let items: Vec<BalanceItem> = items
            .into_iter()
            .map(|item| {
                updated
                    .iter()
                    .find(|changed| changed.id == item.id)
                    .cloned()
                    .unwrap_or(item)
            })
            .collect();
        self.schedule_updates(&items);
        Ok(items)
    }
}

fn refresh_queue(
    settings: QueueSettings,
    cached_balances: Arc<dyn CachedBalanceRepositoryTrait>,
    kind: ReceivableBalanceType,
    tz: Tz,
) -> RefreshQueue {
    GroupedThrottledQueue::new(settings, move |organization_id: String, object_ids: Vec<String>| {
        let cached_balances = cached_balances.clone();
        async move {
            refresh(cached_balances.as_ref(), &organization_id, kind, &object_ids, tz).await
        }
    })
}

async fn refresh(
    cached_balances: &dyn CachedBalanceRepositoryTrait,
    organization_id: &str,
    kind: ReceivableBalanceType,
    object_ids: &[String],
    tz: Tz,
) -> Result<()> {
    let offset = due_offset(Utc::now(), tz);
    let refreshed = cached_balances
        .refresh(organization_id, kind, object_ids, offset)
        .await?;
    debug!(
        "Refreshed {} {} balances for organization {}",
        refreshed.len(),
        kind,
        organization_id
    );
    Ok(())
}

#[async_trait]
impl BalanceItemServiceTrait for BalanceItemService {
    fn schedule_update(&self, item: &BalanceItem) {
        let organization_id = item.organization_id.as_str();
        if let Some(member_id) = &item.member_id {
            self.member_queue.add_item(organization_id, member_id.clone());
        }
        if let Some(user_id) = &item.user_id {
            self.user_queue.add_item(organization_id, user_id.clone());
        }
        if let Some(paying_organization_id) = &item.paying_organization_id {
            self.organization_queue
                .add_item(organization_id, paying_organization_id.clone());
        }
        if let Some(registration_id) = &item.registration_id {
            self.registration_queue
                .add_item(organization_id, registration_id.clone());
            if item.item_type == BalanceItemType::RegistrationBundleDiscount {
                self.bundle_discount_queue.add_item(registration_id.clone());
            }
        }
    }

    fn schedule_updates(&self, items: &[BalanceItem]) {
        for item in items {
            self.schedule_update(item);
        }
    }

    fn schedule_object_refresh(
        &self,
        organization_id: &str,
        object_type: ReceivableBalanceType,
        object_id: &str,
    ) {
        let queue = match object_type {
            ReceivableBalanceType::Member => &self.member_queue,
            ReceivableBalanceType::User | ReceivableBalanceType::UserWithoutMembers => {
                &self.user_queue
            }
            ReceivableBalanceType::Organization => &self.organization_queue,
            ReceivableBalanceType::Registration => &self.registration_queue,
        };
        queue.add_item(organization_id, object_id.to_string());
    }

    async fn update_paid_and_pending(&self, items: &[BalanceItem]) -> Result<Vec<BalanceItem>> {
        let mut ids: Vec<String> = Vec::with_capacity(items.len());
        for item in items {
            if !ids.contains(&item.id) {
                ids.push(item.id.clone());
            }
        }
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Updating paid and pending amounts of {} balance items", ids.len());

        let updated = self.balance_items.update_paid_and_pending(&ids).await?;
        // Items whose receivables changed before the recompute still need the old side refreshed.
        self.schedule_updates(items);
        self.schedule_updates(&updated);
        Ok(updated)
    }

    async fn flush_caches(&self, organization_id: &str) {
        // Members first: their handler feeds the user queue.
        self.member_queue.flush_group_and_wait(organization_id).await;
        self.user_queue.flush_group_and_wait(organization_id).await;
        self.organization_queue
            .flush_group_and_wait(organization_id)
            .await;
        self.registration_queue
            .flush_group_and_wait(organization_id)
            .await;
        self.bundle_discount_queue.flush_and_wait().await;
    }

    async fn flush_all(&self) {
        info!("Flushing all balance queues");
        self.member_queue.flush_and_wait().await;
        self.user_queue.flush_and_wait().await;
        self.organization_queue.flush_and_wait().await;
        self.registration_queue.flush_and_wait().await;
        self.bundle_discount_queue.flush_and_wait().await;
    }

    async fn mark_due(&self, item: &mut BalanceItem) -> Result<()> {
        if item.status == BalanceItemStatus::Hidden {
            item.set_status(BalanceItemStatus::Due);
            self.save(item).await?;
        }

        let Some(depending_id) = item.depending_balance_item_id.clone() else {
            return Ok(());
        };
        let depending = self.balance_items.get_by_ids(&[depending_id])?;
        for mut depending in depending {
            if depending.status == BalanceItemStatus::Hidden {
                depending.set_status(BalanceItemStatus::Due);
                self.save(&mut depending).await?;
            }
        }
        Ok(())
    }

    async fn mark_paid(&self, item: &mut BalanceItem, payment: Option<&Payment>) -> Result<()> {
        self.mark_due(item).await?;

        if item.paid_at.is_some() {
            // Side effects already ran once; a repayment must not reactivate anything.
            return self.mark_updated(item, payment).await;
        }

        if let Some(registration_id) = item.registration_id.as_deref() {
            if item.item_type == BalanceItemType::Registration {
                self.hooks.mark_registration_valid(registration_id).await?;
            }
        }

        if let Some(order_id) = item.order_id.as_deref() {
            if let Some(description) = self.hooks.mark_order_paid(order_id, payment).await? {
                item.description = description;
            }
        }

        item.paid_at = Some(Utc::now());
        self.save(item).await
    }

    async fn mark_updated(&self, item: &BalanceItem, payment: Option<&Payment>) -> Result<()> {
        if let Some(order_id) = item.order_id.as_deref() {
            self.hooks.order_payment_changed(order_id, payment).await?;
        }
        Ok(())
    }

    async fn undo_paid(&self, item: &BalanceItem, payment: Option<&Payment>) -> Result<()> {
        if let Some(order_id) = item.order_id.as_deref() {
            self.hooks.undo_order_paid(order_id, payment).await?;
        }
        Ok(())
    }

    async fn mark_failed(&self, item: &mut BalanceItem, payment: Option<&Payment>) -> Result<()> {
        let Some(order_id) = item.order_id.clone() else {
            return Ok(());
        };
        if self.hooks.mark_order_failed(&order_id, payment).await? == OrderState::Deleted {
            item.set_status(BalanceItemStatus::Hidden);
            self.save(item).await?;
        }
        Ok(())
    }

    async fn undo_failed(&self, item: &BalanceItem, payment: Option<&Payment>) -> Result<()> {
        if let Some(order_id) = item.order_id.as_deref() {
            self.hooks.undo_order_failed(order_id, payment).await?;
        }
        Ok(())
    }

    async fn cancel_items(&self, items: Vec<BalanceItem>) -> Result<Vec<BalanceItem>> {
        let items = self.with_depending_items(items)?;
        self.transition(items, BalanceItemStatus::Due, BalanceItemStatus::Canceled)
            .await
    }

    async fn reactivate_items(&self, items: Vec<BalanceItem>) -> Result<Vec<BalanceItem>> {
        self.transition(items, BalanceItemStatus::Hidden, BalanceItemStatus::Due)
            .await
    }

    async fn cancel_for_orders(&self, order_ids: &[String]) -> Result<Vec<BalanceItem>> {
        if order_ids.is_empty() {
            return Ok(Vec::new());
        }
        let items = self.balance_items.list_for_orders(order_ids)?;
        self.cancel_items(items).await
    }

    async fn reactivate_for_orders(&self, order_ids: &[String]) -> Result<Vec<BalanceItem>> {
        if order_ids.is_empty() {
            return Ok(Vec::new());
        }
        let items = self.balance_items.list_for_orders(order_ids)?;
        self.reactivate_items(items).await
    }
}

impl LedgerEventSink for BalanceItemService {
    fn emit(&self, event: LedgerEvent) {
        if !event.affects_balances() {
            return;
        }
        for item in event.items() {
            self.schedule_update(item);
        }
    }
}
