//! Shared trip expenses and who owes whom.
//!
//! [`ExpenseLedger`] stores expenses and budgets, [`netting`] turns them into
//! balances and settlement suggestions, and [`PaymentTracker`] layers
//! "paid" markers on top without touching the expenses themselves.

pub mod budget;
pub mod ledger;
pub mod netting;
pub mod payments;
pub mod store;

pub use budget::BudgetSummary;
pub use ledger::ExpenseLedger;
pub use netting::{DebtBreakdown, MemberNet, SettlementSuggestion, UserBalance};
pub use payments::PaymentTracker;
pub use store::LedgerStore;

use std::sync::Arc;

use tracing::error;
use tripsync_types::{Result, TripError};

/// Run a blocking store call off the async runtime.
pub(crate) async fn blocking<T, F>(store: &Arc<dyn LedgerStore>, op: F) -> Result<T>
where
    F: FnOnce(&dyn LedgerStore) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || op(store.as_ref()))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            TripError::persistence(e)
        })?
        .map_err(TripError::persistence)
}
