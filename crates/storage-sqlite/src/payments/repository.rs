use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::SqliteConnection;
use std::sync::Arc;
use uuid::Uuid;

use super::model::{BalanceItemPaymentDB, PaymentDB};
use crate::db::{get_connection, WriteHandle};
use crate::errors::IntoCore;
use crate::schema::{balance_item_payments, payments};
use ledgerkeep_core::balances::{
    BalanceItemPayment, JoinRowChange, NewBalanceItemPayment, NewPayment, Payment,
    PaymentRepositoryTrait, PaymentStatus,
};
use ledgerkeep_core::errors::{DatabaseError, Error};
use ledgerkeep_core::Result;

pub struct PaymentRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl PaymentRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        PaymentRepository { pool, writer }
    }
}

fn find_payment(conn: &mut SqliteConnection, payment_id: &str) -> Result<Payment> {
    payments::table
        .find(payment_id)
        .select(PaymentDB::as_select())
        .first::<PaymentDB>(conn)
        .into_core()?
        .try_into()
}

fn row_not_found(row_id: &str) -> Error {
    Error::Database(DatabaseError::NotFound(format!(
        "balance item payment {}",
        row_id
    )))
}

#[async_trait]
impl PaymentRepositoryTrait for PaymentRepository {
    fn get_by_id(&self, payment_id: &str) -> Result<Payment> {
        let mut conn = get_connection(&self.pool)?;
        find_payment(&mut conn, payment_id)
    }

    fn list_balance_item_payments(&self, payment_id: &str) -> Result<Vec<BalanceItemPayment>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = balance_item_payments::table
            .filter(balance_item_payments::payment_id.eq(payment_id))
            .select(BalanceItemPaymentDB::as_select())
            .load::<BalanceItemPaymentDB>(&mut conn)
            .into_core()?;
        Ok(rows.into_iter().map(BalanceItemPayment::from).collect())
    }

    async fn create_with_rows(
        &self,
        new_payment: NewPayment,
        rows: Vec<NewBalanceItemPayment>,
    ) -> Result<(Payment, Vec<BalanceItemPayment>)> {
        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4().to_string(),
            organization_id: new_payment.organization_id,
            status: new_payment.status,
            method: new_payment.method,
            payment_type: new_payment.payment_type,
            price: new_payment.price,
            paid_at: new_payment.paid_at,
            created_at: now,
            updated_at: now,
        };
        let join_rows: Vec<BalanceItemPaymentDB> = rows
            .into_iter()
            .map(|row| BalanceItemPaymentDB {
                id: Uuid::new_v4().to_string(),
                organization_id: row.organization_id,
                balance_item_id: row.balance_item_id,
                payment_id: payment.id.clone(),
                price: row.price,
            })
            .collect();

        self.writer
            .exec(
                move |conn: &mut SqliteConnection| -> Result<(Payment, Vec<BalanceItemPayment>)> {
                    diesel::insert_into(payments::table)
                        .values(PaymentDB::from(&payment))
                        .execute(conn)
                        .into_core()?;
                    for row in &join_rows {
                        diesel::insert_into(balance_item_payments::table)
                            .values(row)
                            .execute(conn)
                            .into_core()?;
                    }
                    Ok((
                        payment,
                        join_rows.into_iter().map(BalanceItemPayment::from).collect(),
                    ))
                },
            )
            .await
    }

    async fn update_status(
        &self,
        payment_id: &str,
        status: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<Payment> {
        let payment_id = payment_id.to_string();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<Payment> {
                let updated = diesel::update(payments::table.find(&payment_id))
                    .set((
                        payments::status.eq(status.as_str()),
                        payments::paid_at.eq(paid_at.map(|paid_at| paid_at.naive_utc())),
                        payments::updated_at.eq(Utc::now().naive_utc()),
                    ))
                    .execute(conn)
                    .into_core()?;
                if updated == 0 {
                    return Err(Error::Database(DatabaseError::NotFound(format!(
                        "payment {}",
                        payment_id
                    ))));
                }
                find_payment(conn, &payment_id)
            })
            .await
    }

    async fn apply_join_row_changes(&self, changes: Vec<JoinRowChange>) -> Result<()> {
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                for change in changes {
                    match change {
                        JoinRowChange::Reassign {
                            row_id,
                            balance_item_id,
                        } => {
                            let updated = diesel::update(balance_item_payments::table.find(&row_id))
                                .set(balance_item_payments::balance_item_id.eq(balance_item_id))
                                .execute(conn)
                                .into_core()?;
                            if updated == 0 {
                                return Err(row_not_found(&row_id));
                            }
                        }
                        JoinRowChange::Split {
                            row_id,
                            remaining_price,
                            new_row,
                        } => {
                            let updated = diesel::update(balance_item_payments::table.find(&row_id))
                                .set(balance_item_payments::price.eq(remaining_price))
                                .execute(conn)
                                .into_core()?;
                            if updated == 0 {
                                return Err(row_not_found(&row_id));
                            }
                            diesel::insert_into(balance_item_payments::table)
                                .values(BalanceItemPaymentDB::from(new_row))
                                .execute(conn)
                                .into_core()?;
                        }
                    }
                }
                Ok(())
            })
            .await
    }
}
