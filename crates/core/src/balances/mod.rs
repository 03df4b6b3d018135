//! Balances module - ledger models, cached balance aggregation and the balance item service.

mod balance_item_service;
mod balances_model;
mod balances_traits;
mod cached_balance;



#[cfg(test)]
pub(crate) mod test_support;

pub use balance_item_service::BalanceItemService;
pub use balances_model::{
    relations_match, BalanceItem, BalanceItemField, BalanceItemPayment, BalanceItemPaymentDetail,
    BalanceItemRelation, BalanceItemRelationType, BalanceItemRelations, BalanceItemStatus,
    BalanceItemType, BalanceTotals, CachedBalance, JoinRowChange, NewBalanceItem,
    NewBalanceItemPayment, NewPayment, PaidAndPending, Payment, PaymentMethod, PaymentStatus,
    PaymentType, ReceivableBalanceType, LEDGER_RELEVANT_FIELDS,
};
pub use balances_traits::{
    BalanceItemRepositoryTrait, BalanceItemServiceTrait, CachedBalanceRepositoryTrait,
    LedgerHooksTrait, MemberUserRepositoryTrait, NoOpLedgerHooks, OrderState,
    PaymentRepositoryTrait,
};
pub use cached_balance::{aggregate_balance, combine_user_balance};
