use std::sync::Arc;

use ledgerkeep_core::balances::{
    BalanceItemService, CachedBalanceRepositoryTrait, LedgerHooksTrait, NoOpLedgerHooks,
};
use ledgerkeep_core::payments::{PaymentStatusService, PaymentStatusServiceTrait};
use ledgerkeep_core::reallocation::{PaymentReallocationService, PaymentReallocationServiceTrait};
use ledgerkeep_core::settings::LedgerSettings;
use ledgerkeep_storage_sqlite::{
    db::{self, write_actor},
    BalanceItemRepository, CachedBalanceRepository, MemberUserRepository, PaymentRepository,
};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;
use crate::ledger_events::WorkerLedgerEventSink;

pub struct AppState {
    pub settings: LedgerSettings,
    pub balance_item_service: Arc<BalanceItemService>,
    /// Entry points for embedding callers; the worker loop itself only sweeps.
    #[allow(dead_code)]
    pub reallocation_service: Arc<dyn PaymentReallocationServiceTrait>,
    #[allow(dead_code)]
    pub payment_status_service: Arc<dyn PaymentStatusServiceTrait>,
    #[allow(dead_code)]
    pub balance_item_repository: Arc<BalanceItemRepository>,
    #[allow(dead_code)]
    pub member_user_repository: Arc<MemberUserRepository>,
    pub cached_balance_repository: Arc<dyn CachedBalanceRepositoryTrait>,
}

pub fn init_tracing() {
    let log_format = std::env::var("LEDGER_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    // `init` also routes `log` records from the library crates into tracing.
    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

pub async fn build_state(config: &Config) -> anyhow::Result<Arc<AppState>> {
    build_state_with_hooks(config, Arc::new(NoOpLedgerHooks)).await
}

pub async fn build_state_with_hooks(
    config: &Config,
    hooks: Arc<dyn LedgerHooksTrait>,
) -> anyhow::Result<Arc<AppState>> {
    let settings = config.ledger_settings();
    tracing::info!(
        "Starting ledger worker in {} (reallocation enabled: {})",
        settings.environment,
        settings.reallocation.is_enabled()
    );

    let db_path = db::init(&config.db_path)?;
    tracing::info!("Database path in use: {}", db_path);

    let pool = db::create_pool(&db_path)?;
    db::run_migrations(&pool)?;
    let writer = write_actor::spawn_writer((*pool).clone());

    // Ledger event sink - two-phase initialization: the balance item repository
    // emits into it, and its consumer needs that repository.
    let ledger_event_sink = Arc::new(WorkerLedgerEventSink::new());

    let balance_item_repository = Arc::new(
        BalanceItemRepository::new(pool.clone(), writer.clone())
            .with_event_sink(ledger_event_sink.clone()),
    );
    let payment_repository = Arc::new(PaymentRepository::new(pool.clone(), writer.clone()));
    let cached_balance_repository =
        Arc::new(CachedBalanceRepository::new(pool.clone(), writer.clone()));
    let member_user_repository = Arc::new(MemberUserRepository::new(pool.clone(), writer.clone()));

    let balance_item_service = Arc::new(BalanceItemService::new(
        &settings,
        balance_item_repository.clone(),
        cached_balance_repository.clone(),
        member_user_repository.clone(),
        hooks,
    ));
    let reallocation_service = Arc::new(PaymentReallocationService::new(
        settings.reallocation,
        balance_item_repository.clone(),
        payment_repository.clone(),
        balance_item_service.clone(),
    ));
    let payment_status_service = Arc::new(PaymentStatusService::new(
        payment_repository,
        balance_item_repository.clone(),
        balance_item_service.clone(),
    ));

    // Phase 2: every consumer exists, start forwarding.
    ledger_event_sink.start_worker(balance_item_service.clone());

    Ok(Arc::new(AppState {
        settings,
        balance_item_service,
        reallocation_service,
        payment_status_service,
        balance_item_repository,
        member_user_repository,
        cached_balance_repository,
    }))
}
