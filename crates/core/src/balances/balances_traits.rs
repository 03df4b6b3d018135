//! Repository and service traits for the ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::balances_model::{
    BalanceItem, BalanceItemPayment, BalanceItemPaymentDetail, BalanceItemStatus, CachedBalance,
    JoinRowChange, NewBalanceItem, NewBalanceItemPayment, NewPayment, Payment, PaymentStatus,
    ReceivableBalanceType,
};
use crate::errors::Result;

/// Repository trait for balance items.
#[async_trait]
pub trait BalanceItemRepositoryTrait: Send + Sync {
    fn get_by_id(&self, balance_item_id: &str) -> Result<BalanceItem>;

    /// Missing ids are skipped.
    fn get_by_ids(&self, balance_item_ids: &[String]) -> Result<Vec<BalanceItem>>;

    fn list_for_orders(&self, order_ids: &[String]) -> Result<Vec<BalanceItem>>;

    /// Visible items of one receivable that still carry an open or pending amount.
    ///
    /// For `User` this is the user's own items without a member plus the items
    /// of every member linked to the user.
    fn list_outstanding(
        &self,
        organization_id: &str,
        object_type: ReceivableBalanceType,
        object_id: &str,
    ) -> Result<Vec<BalanceItem>>;

    /// Join rows of the given items, with the status of their payments.
    fn load_payments(&self, balance_item_ids: &[String]) -> Result<Vec<BalanceItemPaymentDetail>>;

    async fn create(&self, new_item: NewBalanceItem) -> Result<BalanceItem>;

    /// Persists status, description and `paid_at` of an existing item.
    async fn save(&self, item: BalanceItem) -> Result<BalanceItem>;

    async fn set_status(
        &self,
        balance_item_ids: &[String],
        status: BalanceItemStatus,
    ) -> Result<Vec<BalanceItem>>;

    /// Recomputes cached paid, pending and open amounts from the join rows.
    async fn update_paid_and_pending(&self, balance_item_ids: &[String]) -> Result<Vec<BalanceItem>>;

    /// Re-points every join row of `from_ids` to `into_id`. Returns the number of rows moved.
    async fn merge_payments(&self, into_id: &str, from_ids: &[String]) -> Result<usize>;
}

/// Repository trait for payments and their join rows.
#[async_trait]
pub trait PaymentRepositoryTrait: Send + Sync {
    fn get_by_id(&self, payment_id: &str) -> Result<Payment>;

    fn list_balance_item_payments(&self, payment_id: &str) -> Result<Vec<BalanceItemPayment>>;

    /// Creates a payment with its join rows in one transaction.
    async fn create_with_rows(
        &self,
        new_payment: NewPayment,
        rows: Vec<NewBalanceItemPayment>,
    ) -> Result<(Payment, Vec<BalanceItemPayment>)>;

    async fn update_status(
        &self,
        payment_id: &str,
        status: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<Payment>;

    /// Applies reassignments and splits of existing join rows in one transaction.
    async fn apply_join_row_changes(&self, changes: Vec<JoinRowChange>) -> Result<()>;
}

/// Repository trait for persisted aggregate balances.
#[async_trait]
pub trait CachedBalanceRepositoryTrait: Send + Sync {
    /// Recomputes and stores the balances of the given objects.
    ///
    /// Objects without items are stored with zero amounts. Refreshing users
    /// also refreshes their `UserWithoutMembers` rows.
    async fn refresh(
        &self,
        organization_id: &str,
        object_type: ReceivableBalanceType,
        object_ids: &[String],
        due_offset: DateTime<Utc>,
    ) -> Result<Vec<CachedBalance>>;

    fn get_for_objects(
        &self,
        organization_id: &str,
        object_type: ReceivableBalanceType,
        object_ids: &[String],
    ) -> Result<Vec<CachedBalance>>;

    /// Balances whose next due date has come within the due offset.
    fn list_needing_refresh(&self, due_offset: DateTime<Utc>) -> Result<Vec<CachedBalance>>;
}

/// Member to user links.
pub trait MemberUserRepositoryTrait: Send + Sync {
    fn user_ids_for_members(&self, member_ids: &[String]) -> Result<Vec<String>>;

    fn member_ids_for_user(&self, user_id: &str) -> Result<Vec<String>>;
}

/// What became of an order after a failed payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    Active,
    Deleted,
}

/// Side effects owned by other domains (registrations, orders, documents).
#[async_trait]
pub trait LedgerHooksTrait: Send + Sync {
    async fn mark_registration_valid(&self, registration_id: &str) -> Result<()>;

    /// Marks the order paid. Returns the balance description to store, if the order has one.
    async fn mark_order_paid(&self, order_id: &str, payment: Option<&Payment>)
        -> Result<Option<String>>;

    async fn order_payment_changed(&self, order_id: &str, payment: Option<&Payment>) -> Result<()>;

    /// Must be safe to run repeatedly.
    async fn undo_order_paid(&self, order_id: &str, payment: Option<&Payment>) -> Result<()>;

    async fn mark_order_failed(&self, order_id: &str, payment: Option<&Payment>) -> Result<OrderState>;

    async fn undo_order_failed(&self, order_id: &str, payment: Option<&Payment>) -> Result<()>;

    async fn update_documents_for_registrations(
        &self,
        organization_id: &str,
        registration_ids: &[String],
    ) -> Result<()>;

    async fn update_bundle_discounts(&self, registration_ids: &[String]) -> Result<()>;
}

/// Hooks for deployments without order, registration or document domains.
#[derive(Clone, Default)]
pub struct NoOpLedgerHooks;

#[async_trait]
impl LedgerHooksTrait for NoOpLedgerHooks {
    async fn mark_registration_valid(&self, _registration_id: &str) -> Result<()> {
        Ok(())
    }

    async fn mark_order_paid(
        &self,
        _order_id: &str,
        _payment: Option<&Payment>,
    ) -> Result<Option<String>> {
        Ok(None)
    }

    async fn order_payment_changed(&self, _order_id: &str, _payment: Option<&Payment>) -> Result<()> {
        Ok(())
    }

    async fn undo_order_paid(&self, _order_id: &str, _payment: Option<&Payment>) -> Result<()> {
        Ok(())
    }

    async fn mark_order_failed(
        &self,
        _order_id: &str,
        _payment: Option<&Payment>,
    ) -> Result<OrderState> {
        Ok(OrderState::Active)
    }

    async fn undo_order_failed(&self, _order_id: &str, _payment: Option<&Payment>) -> Result<()> {
        Ok(())
    }

    async fn update_documents_for_registrations(
        &self,
        _organization_id: &str,
        _registration_ids: &[String],
    ) -> Result<()> {
        Ok(())
    }

    async fn update_bundle_discounts(&self, _registration_ids: &[String]) -> Result<()> {
        Ok(())
    }
}

/// Service trait for balance item orchestration.
#[async_trait]
pub trait BalanceItemServiceTrait: Send + Sync {
    fn schedule_update(&self, item: &BalanceItem);

    fn schedule_updates(&self, items: &[BalanceItem]);

    fn schedule_object_refresh(
        &self,
        organization_id: &str,
        object_type: ReceivableBalanceType,
        object_id: &str,
    );

    async fn update_paid_and_pending(&self, items: &[BalanceItem]) -> Result<Vec<BalanceItem>>;

    async fn flush_caches(&self, organization_id: &str);

    async fn flush_all(&self);

    async fn mark_due(&self, item: &mut BalanceItem) -> Result<()>;

    async fn mark_paid(&self, item: &mut BalanceItem, payment: Option<&Payment>) -> Result<()>;

    async fn mark_updated(&self, item: &BalanceItem, payment: Option<&Payment>) -> Result<()>;

    async fn undo_paid(&self, item: &BalanceItem, payment: Option<&Payment>) -> Result<()>;

    async fn mark_failed(&self, item: &mut BalanceItem, payment: Option<&Payment>) -> Result<()>;

    async fn undo_failed(&self, item: &BalanceItem, payment: Option<&Payment>) -> Result<()>;

    async fn cancel_items(&self, items: Vec<BalanceItem>) -> Result<Vec<BalanceItem>>;

    async fn reactivate_items(&self, items: Vec<BalanceItem>) -> Result<Vec<BalanceItem>>;

    async fn cancel_for_orders(&self, order_ids: &[String]) -> Result<Vec<BalanceItem>>;

    async fn reactivate_for_orders(&self, order_ids: &[String]) -> Result<Vec<BalanceItem>>;
}
