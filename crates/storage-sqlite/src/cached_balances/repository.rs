use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::SqliteConnection;
use log::debug;
use std::sync::Arc;
use uuid::Uuid;

use super::model::CachedBalanceDB;
use crate::balance_items::{receivable_query, BalanceItemDB};
use crate::db::{get_connection, WriteHandle};
use crate::errors::IntoCore;
use crate::schema::{cached_balances, member_users};
use crate::utils::load_chunked;
use ledgerkeep_core::balances::{
    aggregate_balance, combine_user_balance, BalanceItem, BalanceTotals, CachedBalance,
    CachedBalanceRepositoryTrait, ReceivableBalanceType,
};
use ledgerkeep_core::Result;

pub struct CachedBalanceRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl CachedBalanceRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        CachedBalanceRepository { pool, writer }
    }
}

fn totals_for(
    conn: &mut SqliteConnection,
    organization_id: &str,
    object_type: ReceivableBalanceType,
    object_id: &str,
    due_offset: DateTime<Utc>,
) -> Result<BalanceTotals> {
    let items = receivable_query(organization_id, object_type, object_id)
        .load::<BalanceItemDB>(conn)
        .into_core()?
        .into_iter()
        .map(BalanceItem::try_from)
        .collect::<Result<Vec<_>>>()?;
    Ok(aggregate_balance(&items, due_offset))
}

fn load_balances(
    conn: &mut SqliteConnection,
    organization_id: &str,
    object_type: ReceivableBalanceType,
    object_ids: &[String],
) -> Result<Vec<CachedBalance>> {
    load_chunked(object_ids, |chunk| {
        cached_balances::table
            .filter(cached_balances::organization_id.eq(organization_id))
            .filter(cached_balances::object_type.eq(object_type.as_str()))
            .filter(cached_balances::object_id.eq_any(chunk))
            .select(CachedBalanceDB::as_select())
            .load::<CachedBalanceDB>(conn)
            .into_core()?
            .into_iter()
            .map(CachedBalance::try_from)
            .collect()
    })
}

/// Inserts or updates the cached row of one object.
fn store(
    conn: &mut SqliteConnection,
    organization_id: &str,
    object_type: ReceivableBalanceType,
    object_id: &str,
    totals: &BalanceTotals,
) -> Result<CachedBalance> {
    let now = Utc::now();
    let existing = load_balances(conn, organization_id, object_type, &[object_id.to_string()])?
        .into_iter()
        .next();

    match existing {
        Some(mut balance) => {
            balance.apply_totals(totals, now);
            let row = CachedBalanceDB::from(&balance);
            diesel::update(cached_balances::table.find(&balance.id))
                .set(&row)
                .execute(conn)
                .into_core()?;
            Ok(balance)
        }
        None => {
            let mut balance = CachedBalance {
                id: Uuid::new_v4().to_string(),
                organization_id: organization_id.to_string(),
                object_id: object_id.to_string(),
                object_type,
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
            diesel::insert_into(cached_balances::table)
                .values(CachedBalanceDB::from(&balance))
                .execute(conn)
                .into_core()?;
            Ok(balance)
        }
    }
}

/// A user's balance: own items without a member plus every linked member's cached balance.
fn refresh_user(
    conn: &mut SqliteConnection,
    organization_id: &str,
    user_id: &str,
    due_offset: DateTime<Utc>,
) -> Result<CachedBalance> {
    let own = totals_for(
        conn,
        organization_id,
        ReceivableBalanceType::UserWithoutMembers,
        user_id,
        due_offset,
    )?;
    store(
        conn,
        organization_id,
        ReceivableBalanceType::UserWithoutMembers,
        user_id,
        &own,
    )?;

    let member_ids: Vec<String> = member_users::table
        .filter(member_users::user_id.eq(user_id))
        .select(member_users::member_id)
        .load::<String>(conn)
        .into_core()?;
    let members: Vec<BalanceTotals> = load_balances(
        conn,
        organization_id,
        ReceivableBalanceType::Member,
        &member_ids,
    )?
    .iter()
    .map(CachedBalance::totals)
    .collect();

    let totals = combine_user_balance(&own, &members);
    store(
        conn,
        organization_id,
        ReceivableBalanceType::User,
        user_id,
        &totals,
    )
}

#[async_trait]
impl CachedBalanceRepositoryTrait for CachedBalanceRepository {
    async fn refresh(
        &self,
        organization_id: &str,
        object_type: ReceivableBalanceType,
        object_ids: &[String],
        due_offset: DateTime<Utc>,
    ) -> Result<Vec<CachedBalance>> {
        let organization_id = organization_id.to_string();
        let object_ids = object_ids.to_vec();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<Vec<CachedBalance>> {
                let mut refreshed = Vec::with_capacity(object_ids.len());
                for object_id in &object_ids {
                    let balance = if object_type == ReceivableBalanceType::User {
                        refresh_user(conn, &organization_id, object_id, due_offset)?
                    } else {
                        let totals =
                            totals_for(conn, &organization_id, object_type, object_id, due_offset)?;
                        store(conn, &organization_id, object_type, object_id, &totals)?
                    };
                    refreshed.push(balance);
                }
                debug!(
                    "Refreshed {} cached {} balances of organization {}",
                    refreshed.len(),
                    object_type,
                    organization_id
                );
                Ok(refreshed)
            })
            .await
    }

    fn get_for_objects(
        &self,
        organization_id: &str,
        object_type: ReceivableBalanceType,
        object_ids: &[String],
    ) -> Result<Vec<CachedBalance>> {
        let mut conn = get_connection(&self.pool)?;
        load_balances(&mut conn, organization_id, object_type, object_ids)
    }

    fn list_needing_refresh(&self, due_offset: DateTime<Utc>) -> Result<Vec<CachedBalance>> {
        let mut conn = get_connection(&self.pool)?;
        cached_balances::table
            .filter(cached_balances::next_due_at.le(due_offset.naive_utc()))
            .order(cached_balances::next_due_at.asc())
            .select(CachedBalanceDB::as_select())
            .load::<CachedBalanceDB>(&mut conn)
            .into_core()?
            .into_iter()
            .map(CachedBalance::try_from)
            .collect()
    }
}
