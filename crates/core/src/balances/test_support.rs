//! In-memory ledger and recording hooks shared by the service tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use super::balances_model::*;
use super::balances_traits::*;
use super::cached_balance::{aggregate_balance, combine_user_balance};
use crate::errors::{DatabaseError, Error, Result};

pub(crate) const ORG: &str = "org1";

pub(crate) fn ts(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

/// A Due item of one unit at `price`, without payments.
pub(crate) fn item(id: &str, price: i64) -> BalanceItem {
    BalanceItem {
        id: id.to_string(),
        organization_id: ORG.to_string(),
        item_type: BalanceItemType::Registration,
        status: BalanceItemStatus::Due,
        description: format!("Item {}", id),
        unit_price: price,
        amount: 1,
        price_paid: 0,
        price_pending: 0,
        price_open: price,
        due_at: None,
        paid_at: None,
        relations: BalanceItemRelations::new(),
        paying_organization_id: None,
        member_id: None,
        user_id: None,
        registration_id: None,
        order_id: None,
        depending_balance_item_id: None,
        created_at: ts(2024, 1, 1),
        updated_at: ts(2024, 1, 1),
    }
}

pub(crate) fn relations(pairs: &[(BalanceItemRelationType, &str)]) -> BalanceItemRelations {
    pairs
        .iter()
        .map(|(kind, id)| (*kind, BalanceItemRelation::new(*id, format!("Test {}", id))))
        .collect()
}

/// Relations shared by most reallocation scenarios.
pub(crate) fn registration_relations(price_id: &str) -> BalanceItemRelations {
    relations(&[
        (BalanceItemRelationType::Group, "group1"),
        (BalanceItemRelationType::GroupPrice, price_id),
        (BalanceItemRelationType::Member, "member1"),
    ])
}

#[derive(Default)]
struct LedgerState {
    items: Vec<BalanceItem>,
    payments: Vec<Payment>,
    rows: Vec<BalanceItemPayment>,
    cached: Vec<CachedBalance>,
    member_users: Vec<(String, String)>,
    next_id: u64,
}

impl LedgerState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn item_mut(&mut self, id: &str) -> Result<&mut BalanceItem> {
        self.items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| not_found("balance item", id))
    }

    fn payment_status(&self, payment_id: &str) -> Option<PaymentStatus> {
        self.payments
            .iter()
            .find(|payment| payment.id == payment_id)
            .map(|payment| payment.status)
    }

    fn recompute(&mut self, ids: &[String]) -> Vec<BalanceItem> {
        let mut updated = Vec::new();
        for id in ids {
            let totals = PaidAndPending::from_rows(
                self.rows
                    .iter()
                    .filter(|row| &row.balance_item_id == id)
                    .map(|row| (row.price, self.payment_status(&row.payment_id)))
                    .collect::<Vec<_>>(),
            );
            if let Some(item) = self.items.iter_mut().find(|item| &item.id == id) {
                item.apply_paid_and_pending(totals);
                updated.push(item.clone());
            }
        }
        updated
    }

    /// Mirrors the storage receivable filter, including a user's linked members.
    fn in_receivable(
        &self,
        item: &BalanceItem,
        organization_id: &str,
        kind: ReceivableBalanceType,
        object_id: &str,
    ) -> bool {
        if item.organization_id != organization_id {
            return false;
        }
        if item.belongs_to(kind, object_id) {
            return true;
        }
        kind == ReceivableBalanceType::User
            && item.member_id.as_ref().is_some_and(|member_id| {
                self.member_users
                    .iter()
                    .any(|(linked, user_id)| linked == member_id && user_id == object_id)
            })
    }

    fn totals_for(
        &self,
        organization_id: &str,
        kind: ReceivableBalanceType,
        object_id: &str,
        due_offset: DateTime<Utc>,
    ) -> BalanceTotals {
        aggregate_balance(
            self.items
                .iter()
                .filter(|item| item.organization_id == organization_id)
                .filter(|item| item.belongs_to(kind, object_id)),
            due_offset,
        )
    }

    fn store_cached(
        &mut self,
        organization_id: &str,
        kind: ReceivableBalanceType,
        object_id: &str,
        totals: &BalanceTotals,
    ) -> CachedBalance {
        let now = Utc::now();
        if let Some(existing) = self.cached.iter_mut().find(|balance| {
            balance.organization_id == organization_id
                && balance.object_type == kind
                && balance.object_id == object_id
        }) {
            existing.apply_totals(totals, now);
            return existing.clone();
        }
        let id = self.next_id("cached");
        let mut balance = CachedBalance {
            id,
            organization_id: organization_id.to_string(),
            object_id: object_id.to_string(),
            object_type: kind,
            amount_paid: 0,
            amount_open: 0,
            amount_pending: 0,
            next_due_at: None,
            last_reminder_email: None,
            reminder_email_count: 0,
            created_at: now,
            updated_at: now,
        };
        balance.apply_totals(totals, now);
        self.cached.push(balance.clone());
        balance
    }
}

fn not_found(kind: &str, id: &str) -> Error {
    Error::Database(DatabaseError::NotFound(format!("{} {}", kind, id)))
}

/// Keeps items, payments, join rows and cached balances in memory.
#[derive(Default)]
pub(crate) struct InMemoryLedger {
    state: Mutex<LedgerState>,
    refresh_calls: Mutex<Vec<(ReceivableBalanceType, Vec<String>)>>,
}

impl InMemoryLedger {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn insert_item(&self, item: BalanceItem) -> BalanceItem {
        let mut state = self.state.lock().unwrap();
        state.items.push(item.clone());
        item
    }

    /// Adds one payment per price, each linked to `item_id` through a single row,
    /// then refreshes the item's cached amounts.
    pub(crate) fn add_payments(&self, item_id: &str, status: PaymentStatus, prices: &[i64]) {
        let mut state = self.state.lock().unwrap();
        for price in prices {
            let payment_id = state.next_id("payment");
            let row_id = state.next_id("row");
            state.payments.push(Payment {
                id: payment_id.clone(),
                organization_id: ORG.to_string(),
                status,
                method: PaymentMethod::Transfer,
                payment_type: PaymentType::Payment,
                price: *price,
                paid_at: None,
                created_at: ts(2024, 1, 1),
                updated_at: ts(2024, 1, 1),
            });
            state.rows.push(BalanceItemPayment {
                id: row_id,
                organization_id: ORG.to_string(),
                balance_item_id: item_id.to_string(),
                payment_id,
                price: *price,
            });
        }
        state.recompute(&[item_id.to_string()]);
    }

    /// One payment split over several items.
    pub(crate) fn add_payment(&self, status: PaymentStatus, parts: &[(&str, i64)]) -> Payment {
        let mut state = self.state.lock().unwrap();
        let payment = Payment {
            id: state.next_id("payment"),
            organization_id: ORG.to_string(),
            status,
            method: PaymentMethod::Transfer,
            payment_type: PaymentType::Payment,
            price: parts.iter().map(|(_, price)| price).sum(),
            paid_at: None,
            created_at: ts(2024, 1, 1),
            updated_at: ts(2024, 1, 1),
        };
        state.payments.push(payment.clone());
        for (item_id, price) in parts {
            let row_id = state.next_id("row");
            state.rows.push(BalanceItemPayment {
                id: row_id,
                organization_id: ORG.to_string(),
                balance_item_id: item_id.to_string(),
                payment_id: payment.id.clone(),
                price: *price,
            });
        }
        payment
    }

    pub(crate) fn link_member_user(&self, member_id: &str, user_id: &str) {
        self.state
            .lock()
            .unwrap()
            .member_users
            .push((member_id.to_string(), user_id.to_string()));
    }

    pub(crate) fn item(&self, id: &str) -> BalanceItem {
        let state = self.state.lock().unwrap();
        state
            .items
            .iter()
            .find(|item| item.id == id)
            .cloned()
            .unwrap()
    }

    /// Prices of the rows linked to `item_id` whose payment has `status`, in load order.
    pub(crate) fn row_prices(&self, item_id: &str, status: PaymentStatus) -> Vec<i64> {
        let state = self.state.lock().unwrap();
        state
            .rows
            .iter()
            .filter(|row| row.balance_item_id == item_id)
            .filter(|row| state.payment_status(&row.payment_id) == Some(status))
            .map(|row| row.price)
            .collect()
    }

    pub(crate) fn payments(&self) -> Vec<Payment> {
        self.state.lock().unwrap().payments.clone()
    }

    pub(crate) fn rows(&self) -> Vec<BalanceItemPayment> {
        self.state.lock().unwrap().rows.clone()
    }

    pub(crate) fn cached(
        &self,
        kind: ReceivableBalanceType,
        object_id: &str,
    ) -> Option<CachedBalance> {
        let state = self.state.lock().unwrap();
        state
            .cached
            .iter()
            .find(|balance| balance.object_type == kind && balance.object_id == object_id)
            .cloned()
    }

    pub(crate) fn insert_cached(&self, balance: CachedBalance) {
        self.state.lock().unwrap().cached.push(balance);
    }

    /// Every `refresh` call, in order.
    pub(crate) fn refresh_calls(&self) -> Vec<(ReceivableBalanceType, Vec<String>)> {
        self.refresh_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BalanceItemRepositoryTrait for InMemoryLedger {
    fn get_by_id(&self, balance_item_id: &str) -> Result<BalanceItem> {
        let state = self.state.lock().unwrap();
        state
            .items
            .iter()
            .find(|item| item.id == balance_item_id)
            .cloned()
            .ok_or_else(|| not_found("balance item", balance_item_id))
    }

    fn get_by_ids(&self, balance_item_ids: &[String]) -> Result<Vec<BalanceItem>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .items
            .iter()
            .filter(|item| balance_item_ids.contains(&item.id))
            .cloned()
            .collect())
    }

    fn list_for_orders(&self, order_ids: &[String]) -> Result<Vec<BalanceItem>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .items
            .iter()
            .filter(|item| {
                item.order_id
                    .as_ref()
                    .is_some_and(|order_id| order_ids.contains(order_id))
            })
            .cloned()
            .collect())
    }

    fn list_outstanding(
        &self,
        organization_id: &str,
        object_type: ReceivableBalanceType,
        object_id: &str,
    ) -> Result<Vec<BalanceItem>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .items
            .iter()
            .filter(|item| state.in_receivable(item, organization_id, object_type, object_id))
            .filter(|item| item.is_outstanding())
            .cloned()
            .collect())
    }

    fn load_payments(&self, balance_item_ids: &[String]) -> Result<Vec<BalanceItemPaymentDetail>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .rows
            .iter()
            .filter(|row| balance_item_ids.contains(&row.balance_item_id))
            .map(|row| BalanceItemPaymentDetail {
                row: row.clone(),
                payment_status: state.payment_status(&row.payment_id),
            })
            .collect())
    }

    async fn create(&self, new_item: NewBalanceItem) -> Result<BalanceItem> {
        new_item.validate()?;
        let mut state = self.state.lock().unwrap();
        let mut created = item(&state.next_id("item"), new_item.unit_price);
        created.organization_id = new_item.organization_id;
        created.item_type = new_item.item_type;
        created.description = new_item.description;
        created.amount = new_item.amount;
        created.due_at = new_item.due_at;
        created.relations = new_item.relations;
        created.paying_organization_id = new_item.paying_organization_id;
        created.member_id = new_item.member_id;
        created.user_id = new_item.user_id;
        created.registration_id = new_item.registration_id;
        created.order_id = new_item.order_id;
        created.depending_balance_item_id = new_item.depending_balance_item_id;
        created.set_status(new_item.status);
        state.items.push(created.clone());
        Ok(created)
    }

    async fn save(&self, item: BalanceItem) -> Result<BalanceItem> {
        let mut state = self.state.lock().unwrap();
        let stored = state.item_mut(&item.id)?;
        stored.status = item.status;
        stored.description = item.description;
        stored.paid_at = item.paid_at;
        stored.price_open = stored.compute_price_open();
        Ok(stored.clone())
    }

    async fn set_status(
        &self,
        balance_item_ids: &[String],
        status: BalanceItemStatus,
    ) -> Result<Vec<BalanceItem>> {
        let mut state = self.state.lock().unwrap();
        let mut updated = Vec::new();
        for id in balance_item_ids {
            let stored = state.item_mut(id)?;
            stored.set_status(status);
            updated.push(stored.clone());
        }
        Ok(updated)
    }

    async fn update_paid_and_pending(&self, balance_item_ids: &[String]) -> Result<Vec<BalanceItem>> {
        Ok(self.state.lock().unwrap().recompute(balance_item_ids))
    }

    async fn merge_payments(&self, into_id: &str, from_ids: &[String]) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        let mut moved = 0;
        for row in state.rows.iter_mut() {
            if from_ids.contains(&row.balance_item_id) {
                row.balance_item_id = into_id.to_string();
                moved += 1;
            }
        }
        Ok(moved)
    }
}

#[async_trait]
impl PaymentRepositoryTrait for InMemoryLedger {
    fn get_by_id(&self, payment_id: &str) -> Result<Payment> {
        let state = self.state.lock().unwrap();
        state
            .payments
            .iter()
            .find(|payment| payment.id == payment_id)
            .cloned()
            .ok_or_else(|| not_found("payment", payment_id))
    }

    fn list_balance_item_payments(&self, payment_id: &str) -> Result<Vec<BalanceItemPayment>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .rows
            .iter()
            .filter(|row| row.payment_id == payment_id)
            .cloned()
            .collect())
    }

    async fn create_with_rows(
        &self,
        new_payment: NewPayment,
        rows: Vec<NewBalanceItemPayment>,
    ) -> Result<(Payment, Vec<BalanceItemPayment>)> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let payment = Payment {
            id: state.next_id("payment"),
            organization_id: new_payment.organization_id,
            status: new_payment.status,
            method: new_payment.method,
            payment_type: new_payment.payment_type,
            price: new_payment.price,
            paid_at: new_payment.paid_at,
            created_at: now,
            updated_at: now,
        };
        state.payments.push(payment.clone());
        let mut created = Vec::new();
        for row in rows {
            let stored = BalanceItemPayment {
                id: state.next_id("row"),
                organization_id: row.organization_id,
                balance_item_id: row.balance_item_id,
                payment_id: payment.id.clone(),
                price: row.price,
            };
            state.rows.push(stored.clone());
            created.push(stored);
        }
        Ok((payment, created))
    }

    async fn update_status(
        &self,
        payment_id: &str,
        status: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<Payment> {
        let mut state = self.state.lock().unwrap();
        let payment = state
            .payments
            .iter_mut()
            .find(|payment| payment.id == payment_id)
            .ok_or_else(|| not_found("payment", payment_id))?;
        payment.status = status;
        payment.paid_at = paid_at;
        Ok(payment.clone())
    }

    async fn apply_join_row_changes(&self, changes: Vec<JoinRowChange>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for change in changes {
            match change {
                JoinRowChange::Reassign {
                    row_id,
                    balance_item_id,
                } => {
                    let row = state
                        .rows
                        .iter_mut()
                        .find(|row| row.id == row_id)
                        .ok_or_else(|| not_found("balance item payment", &row_id))?;
                    row.balance_item_id = balance_item_id;
                }
                JoinRowChange::Split {
                    row_id,
                    remaining_price,
                    new_row,
                } => {
                    let row = state
                        .rows
                        .iter_mut()
                        .find(|row| row.id == row_id)
                        .ok_or_else(|| not_found("balance item payment", &row_id))?;
                    row.price = remaining_price;
                    state.rows.push(new_row);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CachedBalanceRepositoryTrait for InMemoryLedger {
    async fn refresh(
        &self,
        organization_id: &str,
        object_type: ReceivableBalanceType,
        object_ids: &[String],
        due_offset: DateTime<Utc>,
    ) -> Result<Vec<CachedBalance>> {
        self.refresh_calls
            .lock()
            .unwrap()
            .push((object_type, object_ids.to_vec()));

        let mut state = self.state.lock().unwrap();
        let mut refreshed = Vec::new();
        for object_id in object_ids {
            if object_type != ReceivableBalanceType::User {
                let totals = state.totals_for(organization_id, object_type, object_id, due_offset);
                refreshed.push(state.store_cached(organization_id, object_type, object_id, &totals));
                continue;
            }

            let own = state.totals_for(
                organization_id,
                ReceivableBalanceType::UserWithoutMembers,
                object_id,
                due_offset,
            );
            state.store_cached(
                organization_id,
                ReceivableBalanceType::UserWithoutMembers,
                object_id,
                &own,
            );
            let member_ids: HashSet<String> = state
                .member_users
                .iter()
                .filter(|(_, user_id)| user_id == object_id)
                .map(|(member_id, _)| member_id.clone())
                .collect();
            let members: Vec<BalanceTotals> = state
                .cached
                .iter()
                .filter(|balance| {
                    balance.organization_id == organization_id
                        && balance.object_type == ReceivableBalanceType::Member
                        && member_ids.contains(&balance.object_id)
                })
                .map(CachedBalance::totals)
                .collect();
            let totals = combine_user_balance(&own, &members);
            refreshed.push(state.store_cached(organization_id, object_type, object_id, &totals));
        }
        Ok(refreshed)
    }

    fn get_for_objects(
        &self,
        organization_id: &str,
        object_type: ReceivableBalanceType,
        object_ids: &[String],
    ) -> Result<Vec<CachedBalance>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .cached
            .iter()
            .filter(|balance| {
                balance.organization_id == organization_id
                    && balance.object_type == object_type
                    && object_ids.contains(&balance.object_id)
            })
            .cloned()
            .collect())
    }

    fn list_needing_refresh(&self, due_offset: DateTime<Utc>) -> Result<Vec<CachedBalance>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .cached
            .iter()
            .filter(|balance| balance.next_due_at.is_some_and(|due| due <= due_offset))
            .cloned()
            .collect())
    }
}

impl MemberUserRepositoryTrait for InMemoryLedger {
    fn user_ids_for_members(&self, member_ids: &[String]) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        let mut user_ids: Vec<String> = Vec::new();
        for (member_id, user_id) in &state.member_users {
            if member_ids.contains(member_id) && !user_ids.contains(user_id) {
                user_ids.push(user_id.clone());
            }
        }
        Ok(user_ids)
    }

    fn member_ids_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .member_users
            .iter()
            .filter(|(_, linked)| linked == user_id)
            .map(|(member_id, _)| member_id.clone())
            .collect())
    }
}

/// Hook calls as `(hook, id)` pairs.
#[derive(Default)]
pub(crate) struct RecordingHooks {
    calls: Mutex<Vec<(String, String)>>,
    order_description: Mutex<Option<String>>,
    deleted_orders: Mutex<HashSet<String>>,
}

impl RecordingHooks {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, hook: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == hook)
            .count()
    }

    pub(crate) fn set_order_description(&self, description: &str) {
        *self.order_description.lock().unwrap() = Some(description.to_string());
    }

    pub(crate) fn delete_order_on_failure(&self, order_id: &str) {
        self.deleted_orders
            .lock()
            .unwrap()
            .insert(order_id.to_string());
    }

    fn record(&self, hook: &str, id: &str) {
        self.calls
            .lock()
            .unwrap()
            .push((hook.to_string(), id.to_string()));
    }
}

#[async_trait]
impl LedgerHooksTrait for RecordingHooks {
    async fn mark_registration_valid(&self, registration_id: &str) -> Result<()> {
        self.record("mark_registration_valid", registration_id);
        Ok(())
    }

    async fn mark_order_paid(
        &self,
        order_id: &str,
        _payment: Option<&Payment>,
    ) -> Result<Option<String>> {
        self.record("mark_order_paid", order_id);
        Ok(self.order_description.lock().unwrap().clone())
    }

    async fn order_payment_changed(&self, order_id: &str, _payment: Option<&Payment>) -> Result<()> {
        self.record("order_payment_changed", order_id);
        Ok(())
    }

    async fn undo_order_paid(&self, order_id: &str, _payment: Option<&Payment>) -> Result<()> {
        self.record("undo_order_paid", order_id);
        Ok(())
    }

    async fn mark_order_failed(
        &self,
        order_id: &str,
        _payment: Option<&Payment>,
    ) -> Result<OrderState> {
        self.record("mark_order_failed", order_id);
        if self.deleted_orders.lock().unwrap().contains(order_id) {
            return Ok(OrderState::Deleted);
        }
        Ok(OrderState::Active)
    }

    async fn undo_order_failed(&self, order_id: &str, _payment: Option<&Payment>) -> Result<()> {
        self.record("undo_order_failed", order_id);
        Ok(())
    }

    async fn update_documents_for_registrations(
        &self,
        _organization_id: &str,
        registration_ids: &[String],
    ) -> Result<()> {
        for id in registration_ids {
            self.record("update_documents", id);
        }
        Ok(())
    }

    async fn update_bundle_discounts(&self, registration_ids: &[String]) -> Result<()> {
        for id in registration_ids {
            self.record("update_bundle_discounts", id);
        }
        Ok(())
    }
}
