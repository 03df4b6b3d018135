//! Ledger event types.

use serde::{Deserialize, Serialize};

use crate::balances::{BalanceItem, BalanceItemField};

/// Facts about balance item changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    BalanceItemCreated { item: BalanceItem },

    /// `item` holds the values after the update. When a receivable id changed,
    /// `previous` holds the values before it so the old side is refreshed too.
    BalanceItemUpdated {
        item: BalanceItem,
        previous: Option<BalanceItem>,
        changed_fields: Vec<BalanceItemField>,
    },

    BalanceItemDeleted { item: BalanceItem },
}

impl LedgerEvent {
    pub fn created(item: BalanceItem) -> Self {
        Self::BalanceItemCreated { item }
    }

    pub fn updated(item: BalanceItem, changed_fields: Vec<BalanceItemField>) -> Self {
        Self::BalanceItemUpdated {
            item,
            previous: None,
            changed_fields,
        }
    }

    /// Builds an update event by comparing two versions of the same item.
    pub fn diff(previous: BalanceItem, item: BalanceItem) -> Self {
        let changed_fields = changed_fields(&previous, &item);
        Self::BalanceItemUpdated {
            item,
            previous: Some(previous),
            changed_fields,
        }
    }

    pub fn deleted(item: BalanceItem) -> Self {
        Self::BalanceItemDeleted { item }
    }

    /// Whether handling this event can move a cached balance.
    pub fn affects_balances(&self) -> bool {
        match self {
            Self::BalanceItemCreated { .. } | Self::BalanceItemDeleted { .. } => true,
            Self::BalanceItemUpdated { changed_fields, .. } => {
                changed_fields.iter().any(BalanceItemField::affects_balances)
            }
        }
    }

    /// Every item version whose receivables need a refresh.
    pub fn items(&self) -> Vec<&BalanceItem> {
        match self {
            Self::BalanceItemCreated { item } | Self::BalanceItemDeleted { item } => vec![item],
            Self::BalanceItemUpdated { item, previous, .. } => {
                let mut items = vec![item];
                items.extend(previous.as_ref());
                items
            }
        }
    }
}

/// Fields that differ between two versions of a balance item.
pub fn changed_fields(before: &BalanceItem, after: &BalanceItem) -> Vec<BalanceItemField> {
    let mut fields = Vec::new();
    let mut check = |changed: bool, field: BalanceItemField| {
        if changed {
            fields.push(field);
        }
    };
    check(before.status != after.status, BalanceItemField::Status);
    check(before.due_at != after.due_at, BalanceItemField::DueAt);
    check(before.unit_price != after.unit_price, BalanceItemField::UnitPrice);
    check(before.amount != after.amount, BalanceItemField::Amount);
    check(before.member_id != after.member_id, BalanceItemField::MemberId);
    check(before.user_id != after.user_id, BalanceItemField::UserId);
    check(
        before.paying_organization_id != after.paying_organization_id,
        BalanceItemField::PayingOrganizationId,
    );
    check(
        before.registration_id != after.registration_id,
        BalanceItemField::RegistrationId,
    );
    check(before.description != after.description, BalanceItemField::Description);
    check(before.paid_at != after.paid_at, BalanceItemField::PaidAt);
    check(before.relations != after.relations, BalanceItemField::Relations);
    check(before.order_id != after.order_id, BalanceItemField::OrderId);
    fields
}
