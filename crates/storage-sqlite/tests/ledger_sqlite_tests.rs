//! End-to-end ledger flows over a real SQLite database.

use std::sync::Arc;

use chrono::Utc;
use tempfile::{tempdir, TempDir};

use ledgerkeep_core::balances::{
    BalanceItem, BalanceItemRelation, BalanceItemRelationType, BalanceItemRelations,
    BalanceItemRepositoryTrait, BalanceItemService, BalanceItemServiceTrait, BalanceItemStatus,
    BalanceItemType, CachedBalanceRepositoryTrait, NewBalanceItem, NewBalanceItemPayment,
    NewPayment, NoOpLedgerHooks, PaymentMethod, PaymentRepositoryTrait, PaymentStatus,
    PaymentType, ReceivableBalanceType,
};
use ledgerkeep_core::payments::{PaymentStatusService, PaymentStatusServiceTrait};
use ledgerkeep_core::reallocation::{
    PaymentReallocationService, PaymentReallocationServiceTrait, ReallocationOutcome,
};
use ledgerkeep_core::settings::{Environment, LedgerSettings};
use ledgerkeep_storage_sqlite::{
    create_pool, init, run_migrations, spawn_writer, BalanceItemRepository,
    CachedBalanceRepository, MemberUserRepository, PaymentRepository,
};

const ORG: &str = "org1";

struct Ledger {
    items: Arc<BalanceItemRepository>,
    payments: Arc<PaymentRepository>,
    cached: Arc<CachedBalanceRepository>,
    service: Arc<BalanceItemService>,
    reallocation: PaymentReallocationService,
    statuses: PaymentStatusService,
    _dir: TempDir,
}

fn setup() -> Ledger {
    let dir = tempdir().expect("Failed to create temp directory");
    let db_path = init(&dir.path().join("db").join("ledger.db").to_string_lossy())
        .expect("Failed to init database");
    let pool = create_pool(&db_path).expect("Failed to create pool");
    run_migrations(&pool).expect("Failed to run migrations");
    let writer = spawn_writer((*pool).clone());

    let items = Arc::new(BalanceItemRepository::new(pool.clone(), writer.clone()));
    let payments = Arc::new(PaymentRepository::new(pool.clone(), writer.clone()));
    let cached = Arc::new(CachedBalanceRepository::new(pool.clone(), writer.clone()));
    let members = Arc::new(MemberUserRepository::new(pool.clone(), writer.clone()));

    let settings = LedgerSettings::new(Environment::Test);
    let service = Arc::new(BalanceItemService::new(
        &settings,
        items.clone(),
        cached.clone(),
        members,
        Arc::new(NoOpLedgerHooks),
    ));
    let reallocation = PaymentReallocationService::new(
        settings.reallocation,
        items.clone(),
        payments.clone(),
        service.clone(),
    );
    let statuses = PaymentStatusService::new(payments.clone(), items.clone(), service.clone());

    Ledger {
        items,
        payments,
        cached,
        service,
        reallocation,
        statuses,
        _dir: dir,
    }
}

fn relations(pairs: &[(BalanceItemRelationType, &str)]) -> BalanceItemRelations {
    pairs
        .iter()
        .map(|(kind, id)| (*kind, BalanceItemRelation::new(*id, id.to_uppercase())))
        .collect()
}

fn registration(price_id: &str) -> BalanceItemRelations {
    relations(&[
        (BalanceItemRelationType::Group, "group1"),
        (BalanceItemRelationType::GroupPrice, price_id),
        (BalanceItemRelationType::Member, "member1"),
    ])
}

async fn charge(ledger: &Ledger, price: i64, relations: BalanceItemRelations) -> BalanceItem {
    ledger
        .items
        .create(NewBalanceItem {
            organization_id: ORG.to_string(),
            item_type: BalanceItemType::Registration,
            status: BalanceItemStatus::Due,
            description: String::new(),
            unit_price: price,
            amount: 1,
            due_at: None,
            relations,
            paying_organization_id: None,
            member_id: Some("member1".to_string()),
            user_id: None,
            registration_id: None,
            order_id: None,
            depending_balance_item_id: None,
        })
        .await
        .unwrap()
}

async fn pay(ledger: &Ledger, item: &BalanceItem, price: i64, status: PaymentStatus) -> String {
    let (payment, _) = ledger
        .payments
        .create_with_rows(
            NewPayment {
                organization_id: ORG.to_string(),
                status,
                method: PaymentMethod::Transfer,
                payment_type: PaymentType::Payment,
                price,
                paid_at: None,
            },
            vec![NewBalanceItemPayment {
                organization_id: ORG.to_string(),
                balance_item_id: item.id.clone(),
                price,
            }],
        )
        .await
        .unwrap();
    ledger
        .items
        .update_paid_and_pending(&[item.id.clone()])
        .await
        .unwrap();
    payment.id
}

#[tokio::test]
async fn test_credit_moves_between_unrelated_items() {
    let ledger = setup();
    let canceled = charge(&ledger, 200, registration("p1")).await;
    pay(&ledger, &canceled, 200, PaymentStatus::Succeeded).await;
    ledger
        .items
        .set_status(&[canceled.id.clone()], BalanceItemStatus::Canceled)
        .await
        .unwrap();
    let open = charge(
        &ledger,
        200,
        relations(&[(BalanceItemRelationType::Webshop, "shop1")]),
    )
    .await;

    let outcome = ledger
        .reallocation
        .reallocate(ORG, "member1", ReceivableBalanceType::Member)
        .await
        .unwrap();
    let summary = match outcome {
        ReallocationOutcome::Completed(summary) => summary,
        other => panic!("expected a completed reallocation, got {:?}", other),
    };

    let payment_id = summary.reallocation_payment_id.unwrap();
    let rows = ledger.payments.list_balance_item_payments(&payment_id).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows.iter().map(|row| row.price).sum::<i64>(), 0);

    assert_eq!(ledger.items.get_by_id(&canceled.id).unwrap().price_open, 0);
    assert_eq!(ledger.items.get_by_id(&open.id).unwrap().price_open, 0);

    ledger.service.flush_all().await;
    let member = ledger
        .cached
        .get_for_objects(ORG, ReceivableBalanceType::Member, &["member1".to_string()])
        .unwrap();
    assert_eq!(member[0].amount_open, 0);
}

#[tokio::test]
async fn test_same_relations_merge_into_the_due_item() {
    let ledger = setup();
    let same = registration("defaultprice");
    let canceled = charge(&ledger, 3000, same.clone()).await;
    pay(&ledger, &canceled, 3000, PaymentStatus::Succeeded).await;
    ledger
        .items
        .set_status(&[canceled.id.clone()], BalanceItemStatus::Canceled)
        .await
        .unwrap();
    let due = charge(&ledger, 3000, same).await;

    let outcome = ledger
        .reallocation
        .reallocate(ORG, "member1", ReceivableBalanceType::Member)
        .await
        .unwrap();
    assert!(matches!(outcome, ReallocationOutcome::Completed(_)));

    assert!(ledger.items.load_payments(&[canceled.id.clone()]).unwrap().is_empty());
    let due = ledger.items.get_by_id(&due.id).unwrap();
    assert_eq!(due.price_paid, 3000);
    assert_eq!(due.price_open, 0);
}

#[tokio::test]
async fn test_payment_status_flow_updates_items_and_caches() {
    let ledger = setup();
    let item = charge(&ledger, 2500, registration("p1")).await;
    let payment_id = pay(&ledger, &item, 2500, PaymentStatus::Pending).await;
    assert_eq!(ledger.items.get_by_id(&item.id).unwrap().price_pending, 2500);

    let payment = ledger
        .statuses
        .handle_status_update(&payment_id, ORG, PaymentStatus::Succeeded)
        .await
        .unwrap();
    assert!(payment.paid_at.is_some());

    let item = ledger.items.get_by_id(&item.id).unwrap();
    assert_eq!(item.price_paid, 2500);
    assert_eq!(item.price_open, 0);
    assert!(item.paid_at.is_some());

    let member = ledger
        .cached
        .get_for_objects(ORG, ReceivableBalanceType::Member, &["member1".to_string()])
        .unwrap();
    assert_eq!(member[0].amount_paid, 2500);
    assert!(member[0].updated_at <= Utc::now());
}
