use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::sqlite::Sqlite;
use diesel::SqliteConnection;
use log::debug;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use super::model::BalanceItemDB;
use crate::db::{get_connection, WriteHandle};
use crate::errors::IntoCore;
use crate::payments::BalanceItemPaymentDB;
use crate::schema::{balance_item_payments, balance_items, member_users, payments};
use crate::utils::{chunk_for_sqlite, load_chunked};
use ledgerkeep_core::balances::{
    BalanceItem, BalanceItemPaymentDetail, BalanceItemRepositoryTrait, BalanceItemStatus,
    NewBalanceItem, PaidAndPending, PaymentStatus, ReceivableBalanceType,
};
use ledgerkeep_core::events::{LedgerEvent, LedgerEventSink, NoOpLedgerEventSink};
use ledgerkeep_core::Result;

pub struct BalanceItemRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
    event_sink: Arc<dyn LedgerEventSink>,
}

impl BalanceItemRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        BalanceItemRepository {
            pool,
            writer,
            event_sink: Arc::new(NoOpLedgerEventSink),
        }
    }

    /// Emits a ledger event after every write that changes an item's own fields.
    pub fn with_event_sink(mut self, event_sink: Arc<dyn LedgerEventSink>) -> Self {
        self.event_sink = event_sink;
        self
    }

    /// Replaces every stored field of an existing item.
    ///
    /// Emits an update event listing the changed fields and carrying the
    /// previous version, so both the old and new receivables get refreshed.
    pub async fn update(&self, item: BalanceItem) -> Result<BalanceItem> {
        let (previous, updated) = self
            .writer
            .exec(move |conn: &mut SqliteConnection| -> Result<(BalanceItem, BalanceItem)> {
                let previous = find_item(conn, &item.id)?;
                let mut updated = item;
                updated.created_at = previous.created_at;
                updated.updated_at = Utc::now();
                updated.price_open = updated.compute_price_open();

                let row = BalanceItemDB::try_from(&updated)?;
                diesel::update(balance_items::table.find(&updated.id))
                    .set(&row)
                    .execute(conn)
                    .into_core()?;
                Ok((previous, updated))
            })
            .await?;

        self.event_sink.emit(LedgerEvent::diff(previous, updated.clone()));
        Ok(updated)
    }

    /// Deletes an item together with its join rows.
    pub async fn delete(&self, balance_item_id: &str) -> Result<BalanceItem> {
        let balance_item_id = balance_item_id.to_string();
        let deleted = self
            .writer
            .exec(move |conn: &mut SqliteConnection| -> Result<BalanceItem> {
                let item = find_item(conn, &balance_item_id)?;
                diesel::delete(
                    balance_item_payments::table
                        .filter(balance_item_payments::balance_item_id.eq(&balance_item_id)),
                )
                .execute(conn)
                .into_core()?;
                diesel::delete(balance_items::table.find(&balance_item_id))
                    .execute(conn)
                    .into_core()?;
                Ok(item)
            })
            .await?;

        self.event_sink.emit(LedgerEvent::deleted(deleted.clone()));
        Ok(deleted)
    }
}

/// Items aggregated into the balance of one receivable.
///
/// A user covers their own items without a member and the items of every linked member.
pub(crate) fn receivable_query<'a>(
    organization_id: &'a str,
    object_type: ReceivableBalanceType,
    object_id: &'a str,
) -> balance_items::BoxedQuery<'a, Sqlite> {
    let query = balance_items::table
        .filter(balance_items::organization_id.eq(organization_id))
        .into_boxed();

    match object_type {
        ReceivableBalanceType::Organization => {
            query.filter(balance_items::paying_organization_id.eq(object_id))
        }
        ReceivableBalanceType::Member => query.filter(balance_items::member_id.eq(object_id)),
        ReceivableBalanceType::User => {
            let linked_members = member_users::table
                .filter(member_users::user_id.eq(object_id))
                .select(member_users::member_id.nullable());
            query.filter(
                balance_items::user_id
                    .eq(object_id)
                    .and(balance_items::member_id.is_null())
                    .or(balance_items::member_id.eq_any(linked_members)),
            )
        }
        ReceivableBalanceType::UserWithoutMembers => query
            .filter(balance_items::user_id.eq(object_id))
            .filter(balance_items::member_id.is_null()),
        ReceivableBalanceType::Registration => {
            query.filter(balance_items::registration_id.eq(object_id))
        }
    }
}

fn find_item(conn: &mut SqliteConnection, balance_item_id: &str) -> Result<BalanceItem> {
    balance_items::table
        .find(balance_item_id)
        .select(BalanceItemDB::as_select())
        .first::<BalanceItemDB>(conn)
        .into_core()?
        .try_into()
}

fn load_items(conn: &mut SqliteConnection, ids: &[String]) -> Result<Vec<BalanceItem>> {
    load_chunked(ids, |chunk| {
        balance_items::table
            .filter(balance_items::id.eq_any(chunk))
            .select(BalanceItemDB::as_select())
            .load::<BalanceItemDB>(conn)
            .into_core()?
            .into_iter()
            .map(BalanceItem::try_from)
            .collect()
    })
}

fn load_payment_details(
    conn: &mut SqliteConnection,
    ids: &[String],
) -> Result<Vec<BalanceItemPaymentDetail>> {
    load_chunked(ids, |chunk| {
        let rows = balance_item_payments::table
            .left_join(payments::table.on(payments::id.eq(balance_item_payments::payment_id)))
            .filter(balance_item_payments::balance_item_id.eq_any(chunk))
            .select((
                BalanceItemPaymentDB::as_select(),
                payments::status.nullable(),
            ))
            .load::<(BalanceItemPaymentDB, Option<String>)>(conn)
            .into_core()?;

        rows.into_iter()
            .map(|(row, status)| {
                Ok(BalanceItemPaymentDetail {
                    row: row.into(),
                    payment_status: status.as_deref().map(PaymentStatus::from_str).transpose()?,
                })
            })
            .collect()
    })
}

/// Writes the status and the open amount that follows from it.
fn store_status(conn: &mut SqliteConnection, item: &BalanceItem) -> Result<()> {
    diesel::update(balance_items::table.find(&item.id))
        .set((
            balance_items::status.eq(item.status.as_str()),
            balance_items::price_open.eq(item.price_open),
            balance_items::updated_at.eq(item.updated_at.naive_utc()),
        ))
        .execute(conn)
        .into_core()?;
    Ok(())
}

#[async_trait]
impl BalanceItemRepositoryTrait for BalanceItemRepository {
    fn get_by_id(&self, balance_item_id: &str) -> Result<BalanceItem> {
        let mut conn = get_connection(&self.pool)?;
        find_item(&mut conn, balance_item_id)
    }

    fn get_by_ids(&self, balance_item_ids: &[String]) -> Result<Vec<BalanceItem>> {
        let mut conn = get_connection(&self.pool)?;
        load_items(&mut conn, balance_item_ids)
    }

    fn list_for_orders(&self, order_ids: &[String]) -> Result<Vec<BalanceItem>> {
        let mut conn = get_connection(&self.pool)?;
        load_chunked(order_ids, |chunk| {
            balance_items::table
                .filter(balance_items::order_id.eq_any(chunk))
                .select(BalanceItemDB::as_select())
                .load::<BalanceItemDB>(&mut conn)
                .into_core()?
                .into_iter()
                .map(BalanceItem::try_from)
                .collect()
        })
    }

    fn list_outstanding(
        &self,
        organization_id: &str,
        object_type: ReceivableBalanceType,
        object_id: &str,
    ) -> Result<Vec<BalanceItem>> {
        let mut conn = get_connection(&self.pool)?;

        receivable_query(organization_id, object_type, object_id)
            .filter(balance_items::status.ne(BalanceItemStatus::Hidden.as_str()))
            .filter(
                balance_items::price_open
                    .ne(0i64)
                    .or(balance_items::price_pending.ne(0i64)),
            )
            .order(balance_items::created_at.asc())
            .load::<BalanceItemDB>(&mut conn)
            .into_core()?
            .into_iter()
            .map(BalanceItem::try_from)
            .collect()
    }

    fn load_payments(&self, balance_item_ids: &[String]) -> Result<Vec<BalanceItemPaymentDetail>> {
        let mut conn = get_connection(&self.pool)?;
        load_payment_details(&mut conn, balance_item_ids)
    }

    async fn create(&self, new_item: NewBalanceItem) -> Result<BalanceItem> {
        new_item.validate()?;
        let now = Utc::now();
        let mut item = BalanceItem {
            id: Uuid::new_v4().to_string(),
            organization_id: new_item.organization_id,
            item_type: new_item.item_type,
            status: new_item.status,
            description: new_item.description,
            unit_price: new_item.unit_price,
            amount: new_item.amount,
            price_paid: 0,
            price_pending: 0,
            price_open: 0,
            due_at: new_item.due_at,
            paid_at: None,
            relations: new_item.relations,
            paying_organization_id: new_item.paying_organization_id,
            member_id: new_item.member_id,
            user_id: new_item.user_id,
            registration_id: new_item.registration_id,
            order_id: new_item.order_id,
            depending_balance_item_id: new_item.depending_balance_item_id,
            created_at: now,
            updated_at: now,
        };
        item.price_open = item.compute_price_open();

        let row = BalanceItemDB::try_from(&item)?;
        let created = self
            .writer
            .exec(move |conn: &mut SqliteConnection| -> Result<BalanceItem> {
                diesel::insert_into(balance_items::table)
                    .values(&row)
                    .returning(BalanceItemDB::as_returning())
                    .get_result(conn)
                    .into_core()?
                    .try_into()
            })
            .await?;

        self.event_sink.emit(LedgerEvent::created(created.clone()));
        Ok(created)
    }

    async fn save(&self, item: BalanceItem) -> Result<BalanceItem> {
        let (previous, saved) = self
            .writer
            .exec(move |conn: &mut SqliteConnection| -> Result<(BalanceItem, BalanceItem)> {
                let previous = find_item(conn, &item.id)?;
                let mut saved = previous.clone();
                saved.description = item.description;
                saved.paid_at = item.paid_at;
                saved.set_status(item.status);
                saved.updated_at = Utc::now();

                diesel::update(balance_items::table.find(&saved.id))
                    .set((
                        balance_items::status.eq(saved.status.as_str()),
                        balance_items::description.eq(&saved.description),
                        balance_items::paid_at.eq(saved.paid_at.map(|paid_at| paid_at.naive_utc())),
                        balance_items::price_open.eq(saved.price_open),
                        balance_items::updated_at.eq(saved.updated_at.naive_utc()),
                    ))
                    .execute(conn)
                    .into_core()?;
                Ok((previous, saved))
            })
            .await?;

        self.event_sink.emit(LedgerEvent::diff(previous, saved.clone()));
        Ok(saved)
    }

    async fn set_status(
        &self,
        balance_item_ids: &[String],
        status: BalanceItemStatus,
    ) -> Result<Vec<BalanceItem>> {
        let ids = balance_item_ids.to_vec();
        let changes = self
            .writer
            .exec(move |conn: &mut SqliteConnection| -> Result<Vec<(BalanceItem, BalanceItem)>> {
                let now = Utc::now();
                let mut changes = Vec::with_capacity(ids.len());
                for previous in load_items(conn, &ids)? {
                    let mut updated = previous.clone();
                    updated.set_status(status);
                    updated.updated_at = now;
                    store_status(conn, &updated)?;
                    changes.push((previous, updated));
                }
                Ok(changes)
            })
            .await?;

        let updated: Vec<BalanceItem> = changes.iter().map(|(_, item)| item.clone()).collect();
        self.event_sink.emit_batch(
            changes
                .into_iter()
                .filter(|(previous, item)| previous.status != item.status)
                .map(|(previous, item)| LedgerEvent::diff(previous, item))
                .collect(),
        );
        Ok(updated)
    }

    async fn update_paid_and_pending(&self, balance_item_ids: &[String]) -> Result<Vec<BalanceItem>> {
        let ids = balance_item_ids.to_vec();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<Vec<BalanceItem>> {
                let mut rows_by_item: HashMap<String, Vec<(i64, Option<PaymentStatus>)>> =
                    HashMap::new();
                for detail in load_payment_details(conn, &ids)? {
                    rows_by_item
                        .entry(detail.row.balance_item_id)
                        .or_default()
                        .push((detail.row.price, detail.payment_status));
                }

                let mut updated = Vec::with_capacity(ids.len());
                for mut item in load_items(conn, &ids)? {
                    let totals =
                        PaidAndPending::from_rows(rows_by_item.remove(&item.id).unwrap_or_default());
                    item.apply_paid_and_pending(totals);
                    diesel::update(balance_items::table.find(&item.id))
                        .set((
                            balance_items::price_paid.eq(item.price_paid),
                            balance_items::price_pending.eq(item.price_pending),
                            balance_items::price_open.eq(item.price_open),
                        ))
                        .execute(conn)
                        .into_core()?;
                    updated.push(item);
                }
                debug!("Recomputed paid and pending amounts of {} balance items", updated.len());
                Ok(updated)
            })
            .await
    }

    async fn merge_payments(&self, into_id: &str, from_ids: &[String]) -> Result<usize> {
        let into_id = into_id.to_string();
        let from_ids = from_ids.to_vec();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<usize> {
                let mut moved = 0;
                for chunk in chunk_for_sqlite(&from_ids) {
                    moved += diesel::update(
                        balance_item_payments::table
                            .filter(balance_item_payments::balance_item_id.eq_any(chunk)),
                    )
                    .set(balance_item_payments::balance_item_id.eq(&into_id))
                    .execute(conn)
                    .into_core()?;
                }
                Ok(moved)
            })
            .await
    }
}
