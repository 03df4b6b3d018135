//! Aggregation of balance items into cached balances.

use chrono::{DateTime, Utc};

use super::balances_model::{BalanceItem, BalanceItemStatus, BalanceTotals};

/// Aggregates the items of one receivable into its cached totals.
///
/// Items due before `due_offset` (or without a due date) make up the current
/// balance. Due items further in the future only set `next_due_at`, add their
/// paid and pending amounts, and may fill a negative open balance up to zero.
pub fn aggregate_balance<'a, I>(items: I, due_offset: DateTime<Utc>) -> BalanceTotals
where
    I: IntoIterator<Item = &'a BalanceItem>,
{
    let mut current = BalanceTotals::default();
    let mut future = BalanceTotals::default();

    for item in items {
        if item.status == BalanceItemStatus::Hidden {
            continue;
        }
        let is_future = !item.is_due(due_offset);

        let totals = if is_future { &mut future } else { &mut current };
        totals.amount_paid += item.price_paid;
        totals.amount_open += item.price_open;
        totals.amount_pending += item.price_pending;

        if is_future && item.price_open != 0 {
            future.next_due_at = match (future.next_due_at, item.due_at) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }
    }

    if future.amount_open != 0 {
        current.next_due_at = future.next_due_at;
    }
    if current.amount_open < 0 && future.amount_open > 0 {
        current.amount_open = (current.amount_open + future.amount_open).min(0);
    }
    current.amount_paid += future.amount_paid;
    current.amount_pending += future.amount_pending;
    current
}

/// Balance of a user: their own items without a member plus the cached
/// balances of every member linked to them.
pub fn combine_user_balance<'a, I>(without_members: &BalanceTotals, members: I) -> BalanceTotals
where
    I: IntoIterator<Item = &'a BalanceTotals>,
{
    let mut totals = *without_members;
    for member in members {
        totals.add(member);
    }
    totals
}
