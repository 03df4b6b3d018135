//! Database model for cached balances.

use std::str::FromStr;

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use ledgerkeep_core::balances::{CachedBalance, ReceivableBalanceType};
use ledgerkeep_core::Result;

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
#[diesel(table_name = crate::schema::cached_balances)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(treat_none_as_null = true)]
#[serde(rename_all = "camelCase")]
pub struct CachedBalanceDB {
    pub id: String,
    pub organization_id: String,
    pub object_id: String,
    pub object_type: String,
    pub amount_paid: i64,
    pub amount_open: i64,
    pub amount_pending: i64,
    pub next_due_at: Option<NaiveDateTime>,
    pub last_reminder_email: Option<NaiveDateTime>,
    pub reminder_email_count: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl TryFrom<CachedBalanceDB> for CachedBalance {
    type Error = ledgerkeep_core::Error;

    fn try_from(db: CachedBalanceDB) -> Result<Self> {
        Ok(Self {
            object_type: ReceivableBalanceType::from_str(&db.object_type)?,
            id: db.id,
            organization_id: db.organization_id,
            object_id: db.object_id,
            amount_paid: db.amount_paid,
            amount_open: db.amount_open,
            amount_pending: db.amount_pending,
            next_due_at: db.next_due_at.map(|due| due.and_utc()),
            last_reminder_email: db.last_reminder_email.map(|sent| sent.and_utc()),
            reminder_email_count: db.reminder_email_count,
            created_at: db.created_at.and_utc(),
            updated_at: db.updated_at.and_utc(),
        })
    }
}

impl From<&CachedBalance> for CachedBalanceDB {
    fn from(balance: &CachedBalance) -> Self {
        Self {
            id: balance.id.clone(),
            organization_id: balance.organization_id.clone(),
            object_id: balance.object_id.clone(),
            object_type: balance.object_type.as_str().to_string(),
            amount_paid: balance.amount_paid,
            amount_open: balance.amount_open,
            amount_pending: balance.amount_pending,
            next_due_at: balance.next_due_at.map(|due| due.naive_utc()),
            last_reminder_email: balance.last_reminder_email.map(|sent| sent.naive_utc()),
            reminder_email_count: balance.reminder_email_count,
            created_at: balance.created_at.naive_utc(),
            updated_at: balance.updated_at.naive_utc(),
        }
    }
}
