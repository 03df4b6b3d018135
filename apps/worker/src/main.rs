mod config;
mod ledger_events;
mod main_lib;
mod scheduler;

use config::Config;
use ledgerkeep_core::balances::BalanceItemServiceTrait;
use main_lib::{build_state, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing();
    let state = build_state(&config).await?;

    scheduler::start_due_sweeper(state.clone(), config.sweep_interval);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested, draining balance queues");
    state.balance_item_service.flush_all().await;
    tracing::info!("Ledger worker stopped");
    Ok(())
}
