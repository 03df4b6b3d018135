//! Domain models for balance items, payments and their join rows.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, ValidationError};

fn unknown(kind: &'static str, value: &str) -> Error {
    Error::Validation(ValidationError::UnknownVariant {
        kind,
        value: value.to_string(),
    })
}

/// Generates `as_str`, `Display` and `FromStr` for string-backed enums.
macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(unknown($kind, other)),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BalanceItemStatus {
    /// Not shown to the payer until a payment is linked.
    Hidden,
    Due,
    /// No longer owed; linked payments still count towards the payer's balance.
    Canceled,
}

string_enum!(BalanceItemStatus, "balance item status", {
    Hidden => "Hidden",
    Due => "Due",
    Canceled => "Canceled",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BalanceItemType {
    Registration,
    AdministrationFee,
    FreeContribution,
    Order,
    Other,
    PlatformMembership,
    CancellationFee,
    RegistrationBundleDiscount,
    Rounding,
}

string_enum!(BalanceItemType, "balance item type", {
    Registration => "Registration",
    AdministrationFee => "AdministrationFee",
    FreeContribution => "FreeContribution",
    Order => "Order",
    Other => "Other",
    PlatformMembership => "PlatformMembership",
    CancellationFee => "CancellationFee",
    RegistrationBundleDiscount => "RegistrationBundleDiscount",
    Rounding => "Rounding",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BalanceItemRelationType {
    Webshop,
    Group,
    GroupPrice,
    GroupOptionMenu,
    GroupOption,
    Member,
    MembershipType,
    Discount,
}

string_enum!(BalanceItemRelationType, "relation type", {
    Webshop => "webshop",
    Group => "group",
    GroupPrice => "groupPrice",
    GroupOptionMenu => "groupOptionMenu",
    GroupOption => "groupOption",
    Member => "member",
    MembershipType => "membershipType",
    Discount => "discount",
});

/// A typed reference from a balance item to the thing it is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceItemRelation {
    pub id: String,
    pub name: String,
}

impl BalanceItemRelation {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Relations keyed by type, in a stable order.
pub type BalanceItemRelations = BTreeMap<BalanceItemRelationType, BalanceItemRelation>;

/// Returns whether two relation maps describe the same thing, tolerating up to
/// `allowed_mismatches` differing or missing relation ids.
///
/// Empty maps never match. With a tolerance of zero both maps must also have
/// the same number of relations.
pub fn relations_match(
    a: &BalanceItemRelations,
    b: &BalanceItemRelations,
    allowed_mismatches: usize,
) -> bool {
    if allowed_mismatches == 0 && a.len() != b.len() {
        return false;
    }
    if a.is_empty() || b.is_empty() {
        return false;
    }

    let allowed = allowed_mismatches.min(a.len()).min(b.len());
    let mut differences = 0;

    for (kind, relation) in a {
        match b.get(kind) {
            Some(other) if other.id == relation.id => {}
            _ => differences += 1,
        }
        if differences > allowed {
            return false;
        }
    }
    for kind in b.keys() {
        if !a.contains_key(kind) {
            differences += 1;
        }
        if differences > allowed {
            return false;
        }
    }
    true
}

/// Cached paid and pending totals of one balance item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaidAndPending {
    pub paid: i64,
    pub pending: i64,
}

impl PaidAndPending {
    /// Sums join row prices per payment status. Failed or missing payments count for nothing.
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (i64, Option<PaymentStatus>)>,
    {
        let mut totals = Self::default();
        for (price, status) in rows {
            match status {
                Some(PaymentStatus::Succeeded) => totals.paid += price,
                Some(PaymentStatus::Created) | Some(PaymentStatus::Pending) => {
                    totals.pending += price
                }
                Some(PaymentStatus::Failed) | None => {}
            }
        }
        totals
    }
}

/// A receivable or payable ledger line, in integer minor units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceItem {
    pub id: String,
    /// The receiving organization.
    pub organization_id: String,
    #[serde(rename = "type")]
    pub item_type: BalanceItemType,
    pub status: BalanceItemStatus,
    pub description: String,
    pub unit_price: i64,
    pub amount: i64,
    pub price_paid: i64,
    pub price_pending: i64,
    /// Cached copy of [`BalanceItem::compute_price_open`] used for filtering.
    pub price_open: i64,
    pub due_at: Option<DateTime<Utc>>,
    /// Set the first time the paid side effects ran.
    pub paid_at: Option<DateTime<Utc>>,
    pub relations: BalanceItemRelations,
    pub paying_organization_id: Option<String>,
    pub member_id: Option<String>,
    pub user_id: Option<String>,
    pub registration_id: Option<String>,
    pub order_id: Option<String>,
    pub depending_balance_item_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BalanceItem {
    pub fn price_total(&self) -> i64 {
        self.unit_price * self.amount
    }

    /// Outstanding signed balance. Only Due items still owe their total.
    pub fn compute_price_open(&self) -> i64 {
        if self.status != BalanceItemStatus::Due {
            return -self.price_paid - self.price_pending;
        }
        self.price_total() - self.price_paid - self.price_pending
    }

    pub fn price_unpaid(&self) -> i64 {
        self.price_total() - self.price_paid
    }

    /// Whether the paid amount covers the total. Only meaningful while Due.
    pub fn is_paid(&self) -> bool {
        if self.price_total() < 0 {
            return self.price_unpaid() >= 0;
        }
        self.price_unpaid() <= 0
    }

    pub fn is_after_due_date(&self, now: DateTime<Utc>) -> bool {
        self.due_at.map_or(true, |due_at| due_at <= now)
    }

    /// Whether the item counts towards the current balance for the given due offset.
    ///
    /// Hidden items never do. Canceled items always do, whatever their due date.
    pub fn is_due(&self, due_offset: DateTime<Utc>) -> bool {
        match self.status {
            BalanceItemStatus::Hidden => false,
            BalanceItemStatus::Canceled => true,
            BalanceItemStatus::Due => self.due_at.map_or(true, |due_at| due_at <= due_offset),
        }
    }

    /// Visible and still carrying an open or pending amount.
    pub fn is_outstanding(&self) -> bool {
        self.status != BalanceItemStatus::Hidden && (self.price_open != 0 || self.price_pending != 0)
    }

    /// Stores freshly computed paid and pending totals and refreshes the cached open amount.
    pub fn apply_paid_and_pending(&mut self, totals: PaidAndPending) {
        self.price_paid = totals.paid;
        self.price_pending = totals.pending;
        self.price_open = self.compute_price_open();
    }

    /// Changes the status and refreshes the cached open amount.
    pub fn set_status(&mut self, status: BalanceItemStatus) {
        self.status = status;
        self.price_open = self.compute_price_open();
    }

    /// Id of this item on the side of the given receivable kind, if any.
    pub fn receivable_id(&self, kind: ReceivableBalanceType) -> Option<&str> {
        match kind {
            ReceivableBalanceType::Organization => self.paying_organization_id.as_deref(),
            ReceivableBalanceType::Member => self.member_id.as_deref(),
            ReceivableBalanceType::User | ReceivableBalanceType::UserWithoutMembers => {
                self.user_id.as_deref()
            }
            ReceivableBalanceType::Registration => self.registration_id.as_deref(),
        }
    }

    /// Whether this item is directly on the side of the given receivable.
    ///
    /// Items carrying a member belong to that member, never directly to a user.
    /// A user's linked members are resolved through the member to user links.
    pub fn belongs_to(&self, kind: ReceivableBalanceType, object_id: &str) -> bool {
        let user_side = matches!(
            kind,
            ReceivableBalanceType::User | ReceivableBalanceType::UserWithoutMembers
        );
        if user_side && self.member_id.is_some() {
            return false;
        }
        self.receivable_id(kind) == Some(object_id)
    }
}

/// Input for creating a balance item.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBalanceItem {
    pub organization_id: String,
    pub item_type: BalanceItemType,
    pub status: BalanceItemStatus,
    pub description: String,
    pub unit_price: i64,
    pub amount: i64,
    pub due_at: Option<DateTime<Utc>>,
    pub relations: BalanceItemRelations,
    pub paying_organization_id: Option<String>,
    pub member_id: Option<String>,
    pub user_id: Option<String>,
    pub registration_id: Option<String>,
    pub order_id: Option<String>,
    pub depending_balance_item_id: Option<String>,
}

impl NewBalanceItem {
    pub fn validate(&self) -> crate::Result<()> {
        if self.organization_id.trim().is_empty() {
            return Err(Error::Validation(ValidationError::MissingField(
                "organization_id".to_string(),
            )));
        }
        if self.amount < 0 {
            return Err(Error::Validation(ValidationError::InvalidInput(
                "amount cannot be negative".to_string(),
            )));
        }
        Ok(())
    }
}

/// Fields whose changes affect cached balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceItemField {
    Status,
    DueAt,
    UnitPrice,
    Amount,
    MemberId,
    UserId,
    PayingOrganizationId,
    RegistrationId,
    Description,
    PaidAt,
    Relations,
    OrderId,
}

impl BalanceItemField {
    /// Whether a change to this field can move any cached balance.
    pub fn affects_balances(&self) -> bool {
        LEDGER_RELEVANT_FIELDS.contains(self)
    }
}

/// Any new mutable field that affects aggregate balances must be listed here,
/// or cached balances silently go stale.
pub const LEDGER_RELEVANT_FIELDS: [BalanceItemField; 8] = [
    BalanceItemField::Status,
    BalanceItemField::DueAt,
    BalanceItemField::UnitPrice,
    BalanceItemField::Amount,
    BalanceItemField::MemberId,
    BalanceItemField::UserId,
    BalanceItemField::PayingOrganizationId,
    BalanceItemField::RegistrationId,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    Created,
    Pending,
    Succeeded,
    Failed,
}

string_enum!(PaymentStatus, "payment status", {
    Created => "Created",
    Pending => "Pending",
    Succeeded => "Succeeded",
    Failed => "Failed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    Unknown,
    Transfer,
    PointOfSale,
    Card,
    DirectDebit,
}

string_enum!(PaymentMethod, "payment method", {
    Unknown => "Unknown",
    Transfer => "Transfer",
    PointOfSale => "PointOfSale",
    Card => "Card",
    DirectDebit => "DirectDebit",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentType {
    Payment,
    Refund,
    Chargeback,
    /// Zero-price payment that only moves credit between balance items.
    Reallocation,
}

string_enum!(PaymentType, "payment type", {
    Payment => "Payment",
    Refund => "Refund",
    Chargeback => "Chargeback",
    Reallocation => "Reallocation",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    pub organization_id: String,
    pub status: PaymentStatus,
    pub method: PaymentMethod,
    #[serde(rename = "type")]
    pub payment_type: PaymentType,
    pub price: i64,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub organization_id: String,
    pub status: PaymentStatus,
    pub method: PaymentMethod,
    pub payment_type: PaymentType,
    pub price: i64,
    pub paid_at: Option<DateTime<Utc>>,
}

impl NewPayment {
    /// A zero-price, already succeeded payment carrying reallocation rows.
    pub fn reallocation(organization_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            organization_id: organization_id.to_string(),
            status: PaymentStatus::Succeeded,
            method: PaymentMethod::Unknown,
            payment_type: PaymentType::Reallocation,
            price: 0,
            paid_at: Some(now),
        }
    }
}

/// How much of a payment applies to one balance item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceItemPayment {
    pub id: String,
    pub organization_id: String,
    pub balance_item_id: String,
    pub payment_id: String,
    pub price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBalanceItemPayment {
    pub organization_id: String,
    pub balance_item_id: String,
    pub price: i64,
}

/// A join row together with the status of its payment (`None` when the payment is gone).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceItemPaymentDetail {
    pub row: BalanceItemPayment,
    pub payment_status: Option<PaymentStatus>,
}

impl BalanceItemPaymentDetail {
    /// Rows of failed or deleted payments are never moved.
    pub fn is_movable(&self) -> bool {
        !matches!(self.payment_status, None | Some(PaymentStatus::Failed))
    }
}

/// An edit to existing join rows produced by reallocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinRowChange {
    /// Re-point a row to another balance item.
    Reassign {
        row_id: String,
        balance_item_id: String,
    },
    /// Lower a row's price and move the difference into a new row on another
    /// balance item for the same payment.
    Split {
        row_id: String,
        remaining_price: i64,
        new_row: BalanceItemPayment,
    },
}

/// Which side of a balance item a cached balance aggregates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReceivableBalanceType {
    Organization,
    Member,
    User,
    UserWithoutMembers,
    Registration,
}

string_enum!(ReceivableBalanceType, "receivable balance type", {
    Organization => "organization",
    Member => "member",
    User => "user",
    UserWithoutMembers => "userWithoutMembers",
    Registration => "registration",
});

/// Aggregated amounts of one receivable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalanceTotals {
    pub amount_paid: i64,
    pub amount_open: i64,
    pub amount_pending: i64,
    pub next_due_at: Option<DateTime<Utc>>,
}

impl BalanceTotals {
    pub fn add(&mut self, other: &BalanceTotals) {
        self.amount_paid += other.amount_paid;
        self.amount_open += other.amount_open;
        self.amount_pending += other.amount_pending;
        self.next_due_at = match (self.next_due_at, other.next_due_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }
}

/// Persisted aggregate balance of one receivable within an organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedBalance {
    pub id: String,
    pub organization_id: String,
    pub object_id: String,
    pub object_type: ReceivableBalanceType,
    pub amount_paid: i64,
    pub amount_open: i64,
    pub amount_pending: i64,
    pub next_due_at: Option<DateTime<Utc>>,
    pub last_reminder_email: Option<DateTime<Utc>>,
    pub reminder_email_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CachedBalance {
    pub fn totals(&self) -> BalanceTotals {
        BalanceTotals {
            amount_paid: self.amount_paid,
            amount_open: self.amount_open,
            amount_pending: self.amount_pending,
            next_due_at: self.next_due_at,
        }
    }

    /// Stores new totals. Reminder counters restart once nothing is open.
    pub fn apply_totals(&mut self, totals: &BalanceTotals, now: DateTime<Utc>) {
        self.amount_paid = totals.amount_paid;
        self.amount_open = totals.amount_open;
        self.amount_pending = totals.amount_pending;
        self.next_due_at = totals.next_due_at;
        if self.amount_open == 0 {
            self.reminder_email_count = 0;
            self.last_reminder_email = None;
        }
        self.updated_at = now;
    }
}
