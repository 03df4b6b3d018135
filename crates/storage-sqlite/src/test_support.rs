//! Shared fixtures for SQLite repository tests.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::{tempdir, TempDir};

use crate::db::{create_pool, run_migrations, spawn_writer, DbPool, WriteHandle};
use ledgerkeep_core::balances::{
    BalanceItemRelation, BalanceItemRelationType, BalanceItemRelations, BalanceItemStatus,
    BalanceItemType, NewBalanceItem,
};

pub(crate) const ORG: &str = "org1";

/// A migrated database in a temp directory. Keep `_dir` alive for the test's duration.
pub(crate) struct TestDb {
    pub pool: Arc<DbPool>,
    pub writer: WriteHandle,
    pub _dir: TempDir,
}

pub(crate) fn test_db() -> TestDb {
    let dir = tempdir().expect("Failed to create temp directory");
    let db_path = dir.path().join("test.db");
    let pool = create_pool(&db_path.to_string_lossy()).expect("Failed to create pool");
    run_migrations(&pool).expect("Failed to run migrations");
    let writer = spawn_writer((*pool).clone());
    TestDb {
        pool,
        writer,
        _dir: dir,
    }
}

pub(crate) fn ts(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

pub(crate) fn registration_relations(price_id: &str) -> BalanceItemRelations {
    let mut relations = BalanceItemRelations::new();
    relations.insert(
        BalanceItemRelationType::Group,
        BalanceItemRelation::new("group1", "Kapoenen"),
    );
    relations.insert(
        BalanceItemRelationType::GroupPrice,
        BalanceItemRelation::new(price_id, "Default price"),
    );
    relations
}

/// A Due registration charge for `member1`, due in the past.
pub(crate) fn new_item(unit_price: i64) -> NewBalanceItem {
    NewBalanceItem {
        organization_id: ORG.to_string(),
        item_type: BalanceItemType::Registration,
        status: BalanceItemStatus::Due,
        description: "Registration".to_string(),
        unit_price,
        amount: 1,
        due_at: None,
        relations: registration_relations("defaultprice"),
        paying_organization_id: None,
        member_id: Some("member1".to_string()),
        user_id: None,
        registration_id: None,
        order_id: None,
        depending_balance_item_id: None,
    }
}
