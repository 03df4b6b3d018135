//! Database models for payments and their join rows.

use std::str::FromStr;

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use ledgerkeep_core::balances::{
    BalanceItemPayment, Payment, PaymentMethod, PaymentStatus, PaymentType,
};
use ledgerkeep_core::Result;

/// Database model for payments
#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    PartialEq,
    Serialize,
    Deserialize,
    Debug,
    Clone,
)]
#[diesel(table_name = crate::schema::payments)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct PaymentDB {
    pub id: String,
    pub organization_id: String,
    pub status: String,
    pub method: String,
    pub payment_type: String,
    pub price: i64,
    pub paid_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Database model for the share of a payment applied to one balance item
#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    PartialEq,
    Serialize,
    Deserialize,
    Debug,
    Clone,
)]
#[diesel(table_name = crate::schema::balance_item_payments)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct BalanceItemPaymentDB {
    pub id: String,
    pub organization_id: String,
    pub balance_item_id: String,
    pub payment_id: String,
    pub price: i64,
}

impl TryFrom<PaymentDB> for Payment {
    type Error = ledgerkeep_core::Error;

    fn try_from(db: PaymentDB) -> Result<Self> {
        Ok(Self {
            status: PaymentStatus::from_str(&db.status)?,
            method: PaymentMethod::from_str(&db.method)?,
            payment_type: PaymentType::from_str(&db.payment_type)?,
            id: db.id,
            organization_id: db.organization_id,
            price: db.price,
            paid_at: db.paid_at.map(|paid_at| paid_at.and_utc()),
            created_at: db.created_at.and_utc(),
            updated_at: db.updated_at.and_utc(),
        })
    }
}

impl From<&Payment> for PaymentDB {
    fn from(payment: &Payment) -> Self {
        Self {
            id: payment.id.clone(),
            organization_id: payment.organization_id.clone(),
            status: payment.status.as_str().to_string(),
            method: payment.method.as_str().to_string(),
            payment_type: payment.payment_type.as_str().to_string(),
            price: payment.price,
            paid_at: payment.paid_at.map(|paid_at| paid_at.naive_utc()),
            created_at: payment.created_at.naive_utc(),
            updated_at: payment.updated_at.naive_utc(),
        }
    }
}

impl From<BalanceItemPaymentDB> for BalanceItemPayment {
    fn from(db: BalanceItemPaymentDB) -> Self {
        Self {
            id: db.id,
            organization_id: db.organization_id,
            balance_item_id: db.balance_item_id,
            payment_id: db.payment_id,
            price: db.price,
        }
    }
}

impl From<BalanceItemPayment> for BalanceItemPaymentDB {
    fn from(row: BalanceItemPayment) -> Self {
        Self {
            id: row.id,
            organization_id: row.organization_id,
            balance_item_id: row.balance_item_id,
            payment_id: row.payment_id,
            price: row.price,
        }
    }
}
