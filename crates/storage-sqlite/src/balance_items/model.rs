//! Database models for balance items.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::IntoCore;
use ledgerkeep_core::balances::{
    BalanceItem, BalanceItemRelation, BalanceItemRelationType, BalanceItemRelations,
    BalanceItemStatus, BalanceItemType,
};
use ledgerkeep_core::Result;

/// Database model for balance items
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
#[diesel(table_name = crate::schema::balance_items)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(treat_none_as_null = true)]
#[serde(rename_all = "camelCase")]
pub struct BalanceItemDB {
    pub id: String,
    pub organization_id: String,
    pub item_type: String,
    pub status: String,
    pub description: String,
    pub unit_price: i64,
    pub amount: i64,
    pub price_paid: i64,
    pub price_pending: i64,
    pub price_open: i64,
    pub due_at: Option<NaiveDateTime>,
    pub paid_at: Option<NaiveDateTime>,
    /// JSON object keyed by relation type.
    pub relations: String,
    pub paying_organization_id: Option<String>,
    pub member_id: Option<String>,
    pub user_id: Option<String>,
    pub registration_id: Option<String>,
    pub order_id: Option<String>,
    pub depending_balance_item_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Serializes relations as `{"webshop": {"id": .., "name": ..}, ..}`.
pub fn encode_relations(relations: &BalanceItemRelations) -> Result<String> {
    let keyed: BTreeMap<&str, &BalanceItemRelation> = relations
        .iter()
        .map(|(kind, relation)| (kind.as_str(), relation))
        .collect();
    serde_json::to_string(&keyed).into_core()
}

pub fn decode_relations(json: &str) -> Result<BalanceItemRelations> {
    if json.trim().is_empty() {
        return Ok(BalanceItemRelations::new());
    }
    let keyed: BTreeMap<String, BalanceItemRelation> = serde_json::from_str(json).into_core()?;
    keyed
        .into_iter()
        .map(|(kind, relation)| Ok((BalanceItemRelationType::from_str(&kind)?, relation)))
        .collect()
}

impl TryFrom<BalanceItemDB> for BalanceItem {
    type Error = ledgerkeep_core::Error;

    fn try_from(db: BalanceItemDB) -> Result<Self> {
        Ok(Self {
            item_type: BalanceItemType::from_str(&db.item_type)?,
            status: BalanceItemStatus::from_str(&db.status)?,
            relations: decode_relations(&db.relations)?,
            id: db.id,
            organization_id: db.organization_id,
            description: db.description,
            unit_price: db.unit_price,
            amount: db.amount,
            price_paid: db.price_paid,
            price_pending: db.price_pending,
            price_open: db.price_open,
            due_at: db.due_at.map(|due_at| due_at.and_utc()),
            paid_at: db.paid_at.map(|paid_at| paid_at.and_utc()),
            paying_organization_id: db.paying_organization_id,
            member_id: db.member_id,
            user_id: db.user_id,
            registration_id: db.registration_id,
            order_id: db.order_id,
            depending_balance_item_id: db.depending_balance_item_id,
            created_at: db.created_at.and_utc(),
            updated_at: db.updated_at.and_utc(),
        })
    }
}

impl TryFrom<&BalanceItem> for BalanceItemDB {
    type Error = ledgerkeep_core::Error;

    fn try_from(item: &BalanceItem) -> Result<Self> {
        Ok(Self {
            id: item.id.clone(),
            organization_id: item.organization_id.clone(),
            item_type: item.item_type.as_str().to_string(),
            status: item.status.as_str().to_string(),
            description: item.description.clone(),
            unit_price: item.unit_price,
            amount: item.amount,
            price_paid: item.price_paid,
            price_pending: item.price_pending,
            price_open: item.price_open,
            due_at: item.due_at.map(|due_at| due_at.naive_utc()),
            paid_at: item.paid_at.map(|paid_at| paid_at.naive_utc()),
            relations: encode_relations(&item.relations)?,
            paying_organization_id: item.paying_organization_id.clone(),
            member_id: item.member_id.clone(),
            user_id: item.user_id.clone(),
            registration_id: item.registration_id.clone(),
            order_id: item.order_id.clone(),
            depending_balance_item_id: item.depending_balance_item_id.clone(),
            created_at: item.created_at.naive_utc(),
            updated_at: item.updated_at.naive_utc(),
        })
    }
}
