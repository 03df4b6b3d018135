use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::SqliteConnection;
use std::sync::Arc;

use super::model::MemberUserDB;
use crate::db::{get_connection, WriteHandle};
use crate::errors::IntoCore;
use crate::schema::member_users;
use crate::utils::load_chunked;
use ledgerkeep_core::balances::MemberUserRepositoryTrait;
use ledgerkeep_core::Result;

pub struct MemberUserRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
    writer: WriteHandle,
}

impl MemberUserRepository {
    pub fn new(
        pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
        writer: WriteHandle,
    ) -> Self {
        MemberUserRepository { pool, writer }
    }

    /// Links a member to a user. Linking twice is a no-op.
    pub async fn link(&self, member_id: &str, user_id: &str) -> Result<()> {
        let link = MemberUserDB {
            member_id: member_id.to_string(),
            user_id: user_id.to_string(),
        };
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                diesel::insert_or_ignore_into(member_users::table)
                    .values(&link)
                    .execute(conn)
                    .into_core()?;
                Ok(())
            })
            .await
    }

    pub async fn unlink(&self, member_id: &str, user_id: &str) -> Result<usize> {
        let member_id = member_id.to_string();
        let user_id = user_id.to_string();
        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<usize> {
                diesel::delete(
                    member_users::table
                        .filter(member_users::member_id.eq(member_id))
                        .filter(member_users::user_id.eq(user_id)),
                )
                .execute(conn)
                .into_core()
            })
            .await
    }
}

impl MemberUserRepositoryTrait for MemberUserRepository {
    fn user_ids_for_members(&self, member_ids: &[String]) -> Result<Vec<String>> {
        let mut conn = get_connection(&self.pool)?;
        let mut user_ids = load_chunked(member_ids, |chunk| {
            member_users::table
                .filter(member_users::member_id.eq_any(chunk))
                .select(member_users::user_id)
                .distinct()
                .load::<String>(&mut conn)
                .into_core()
        })?;
        user_ids.sort();
        user_ids.dedup();
        Ok(user_ids)
    }

    fn member_ids_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        let mut conn = get_connection(&self.pool)?;
        member_users::table
            .filter(member_users::user_id.eq(user_id))
            .select(member_users::member_id)
            .order(member_users::member_id.asc())
            .load::<String>(&mut conn)
            .into_core()
    }
}
