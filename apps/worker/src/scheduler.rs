//! Background sweeper for cached balances whose due date comes into range.
//!
//! A balance only changes when its items change, except for items that
//! become due. Each run reschedules every cached balance with a `next_due_at`
//! inside the due window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ledgerkeep_core::balances::BalanceItemServiceTrait;
use ledgerkeep_core::utils::time_utils::due_offset;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::main_lib::AppState;

pub fn start_due_sweeper(state: Arc<AppState>, every: Duration) {
    tokio::spawn(async move {
        info!("Due date sweeper started ({}s interval)", every.as_secs());

        // First tick is immediate.
        let mut sweep_interval = interval(every);
        loop {
            sweep_interval.tick().await;
            match run_sweep(&state, Utc::now()) {
                Ok(0) => debug!("Due date sweep found nothing to refresh"),
                Ok(count) => info!("Due date sweep scheduled {} balance refreshes", count),
                Err(e) => warn!("Due date sweep failed: {}", e),
            }
        }
    });
}

/// Schedules a refresh for every cached balance that needs one at `now`.
pub fn run_sweep(state: &AppState, now: DateTime<Utc>) -> ledgerkeep_core::Result<usize> {
    let offset = due_offset(now, state.settings.timezone);
    let balances = state.cached_balance_repository.list_needing_refresh(offset)?;
    for balance in &balances {
        state.balance_item_service.schedule_object_refresh(
            &balance.organization_id,
            balance.object_type,
            &balance.object_id,
        );
    }
    Ok(balances.len())
}
