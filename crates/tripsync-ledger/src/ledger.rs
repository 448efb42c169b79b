use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{info, warn};
use uuid::Uuid;

use tripsync_types::ledger::{Budget, Expense, ExpenseSplit, ExpenseWithSplits, NewExpense, SplitMode};
use tripsync_types::{Result, TripError};

use crate::blocking;
use crate::budget::{BudgetSummary, summarize};
use crate::netting::{self, DebtBreakdown, SettlementSuggestion, UserBalance};
use crate::store::LedgerStore;

const CENT: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Custom splits may miss the expense amount by at most this much.
pub const SPLIT_TOLERANCE: Decimal = CENT;

/// Shared and personal expenses of trips, plus per-member budgets.
#[derive(Clone)]
pub struct ExpenseLedger {
    store: Arc<dyn LedgerStore>,
}

impl ExpenseLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Validate, split and store a new expense.
    pub async fn create_expense(&self, new: NewExpense) -> Result<ExpenseWithSplits> {
        validate_header(&new)?;
        let expense = Expense {
            id: Uuid::new_v4(),
            trip_id: new.trip_id,
            title: new.title.trim().to_string(),
            amount: new.amount,
            category: new.category,
            description: new.description,
            paid_by: new.paid_by,
            is_personal: matches!(new.split, SplitMode::Personal),
            created_at: Utc::now(),
        };
        let splits = build_splits(expense.id, expense.amount, expense.paid_by, &new.split)?;

        let item = ExpenseWithSplits { expense, splits };
        let stored = item.clone();
        blocking(&self.store, move |store| {
            store.insert_expense(&stored.expense, &stored.splits)
        })
        .await?;

        info!(
            "Expense '{}' ({}) recorded for trip {}",
            item.expense.title, item.expense.amount, item.expense.trip_id
        );
        Ok(item)
    }

    /// Overwrite an expense and replace its splits. Id, trip and creation
    /// time are kept.
    pub async fn update_expense(&self, id: Uuid, update: NewExpense) -> Result<ExpenseWithSplits> {
        validate_header(&update)?;
        let existing = self
            .get_expense(id)
            .await?
            .ok_or_else(|| TripError::NotFound(format!("expense {id}")))?;

        let expense = Expense {
            id,
            trip_id: existing.expense.trip_id,
            title: update.title.trim().to_string(),
            amount: update.amount,
            category: update.category,
            description: update.description,
            paid_by: update.paid_by,
            is_personal: matches!(update.split, SplitMode::Personal),
            created_at: existing.expense.created_at,
        };
        let splits = build_splits(id, expense.amount, expense.paid_by, &update.split)?;

        let item = ExpenseWithSplits { expense, splits };
        let stored = item.clone();
        let found = blocking(&self.store, move |store| {
            store.replace_expense(&stored.expense, &stored.splits)
        })
        .await?;
        if !found {
            return Err(TripError::NotFound(format!("expense {id}")));
        }
        Ok(item)
    }

    /// Remove an expense and its splits.
    pub async fn delete_expense(&self, id: Uuid) -> Result<()> {
        let deleted = blocking(&self.store, move |store| store.delete_expense(id)).await?;
        if !deleted {
            return Err(TripError::NotFound(format!("expense {id}")));
        }
        Ok(())
    }

    pub async fn get_expense(&self, id: Uuid) -> Result<Option<ExpenseWithSplits>> {
        blocking(&self.store, move |store| store.get_expense(id)).await
    }

    pub async fn list_expenses(&self, trip_id: Uuid) -> Result<Vec<ExpenseWithSplits>> {
        blocking(&self.store, move |store| store.list_expenses(trip_id)).await
    }

    /// Create or replace a member's budget for a trip.
    pub async fn set_budget(&self, trip_id: Uuid, user_id: Uuid, limit: Decimal) -> Result<Budget> {
        if limit < Decimal::ZERO {
            return Err(TripError::validation("budget cannot be negative"));
        }
        let budget = Budget {
            trip_id,
            user_id,
            budget_limit: limit,
        };
        let stored = budget.clone();
        blocking(&self.store, move |store| store.upsert_budget(&stored)).await?;
        Ok(budget)
    }

    pub async fn get_budget(&self, trip_id: Uuid, user_id: Uuid) -> Result<Option<Budget>> {
        blocking(&self.store, move |store| store.get_budget(trip_id, user_id)).await
    }

    pub async fn budget_summary(&self, trip_id: Uuid, user_id: Uuid) -> Result<BudgetSummary> {
        let expenses = self.list_expenses(trip_id).await?;
        let budget = self.get_budget(trip_id, user_id).await?;
        Ok(summarize(&expenses, user_id, budget.as_ref()))
    }

    pub async fn balances(&self, trip_id: Uuid) -> Result<Vec<UserBalance>> {
        let expenses = self.list_expenses(trip_id).await?;
        Ok(netting::compute_balances(&expenses))
    }

    pub async fn suggest_settlements(&self, trip_id: Uuid) -> Result<Vec<SettlementSuggestion>> {
        let balances = self.balances(trip_id).await?;
        Ok(netting::suggest_settlements(&balances))
    }

    pub async fn detailed_debt_breakdown(&self, trip_id: Uuid, user_id: Uuid) -> Result<DebtBreakdown> {
        let expenses = self.list_expenses(trip_id).await?;
        Ok(netting::detailed_breakdown(&expenses, user_id))
    }
}

fn validate_header(new: &NewExpense) -> Result<()> {
    if new.title.trim().is_empty() {
        return Err(TripError::validation("expense title is required"));
    }
    if new.amount <= Decimal::ZERO {
        return Err(TripError::validation("expense amount must be positive"));
    }
    Ok(())
}

/// Turn a split request into split rows. The payer's row starts out paid
/// and settled.
///
/// Equal splits are cut to whole cents and the leftover cents go one each to
/// the first participants, so the rows always add up to `amount`.
pub fn build_splits(
    expense_id: Uuid,
    amount: Decimal,
    paid_by: Uuid,
    split: &SplitMode,
) -> Result<Vec<ExpenseSplit>> {
    let shares: Vec<(Uuid, Decimal)> = match split {
        SplitMode::Personal => return Ok(Vec::new()),
        SplitMode::Equal(participants) => {
            let mut seen = HashSet::new();
            let participants: Vec<Uuid> = participants
                .iter()
                .copied()
                .filter(|p| seen.insert(*p))
                .collect();
            if participants.is_empty() {
                return Err(TripError::validation("a shared expense needs participants"));
            }

            let count = Decimal::from(participants.len());
            let base = (amount / count).round_dp_with_strategy(2, RoundingStrategy::ToZero);
            let mut leftover = amount - base * count;
            participants
                .into_iter()
                .map(|p| {
                    let mut share = base;
                    if leftover >= CENT {
                        share += CENT;
                        leftover -= CENT;
                    }
                    (p, share)
                })
                .collect()
        }
        SplitMode::Custom(custom) => {
            if custom.is_empty() {
                return Err(TripError::validation("a shared expense needs participants"));
            }
            let mut seen = HashSet::new();
            for share in custom {
                if share.amount_owed < Decimal::ZERO {
                    return Err(TripError::validation("split amounts cannot be negative"));
                }
                if !seen.insert(share.user_id) {
                    return Err(TripError::validation(format!(
                        "participant {} appears twice",
                        share.user_id
                    )));
                }
            }
            let total: Decimal = custom.iter().map(|s| s.amount_owed).sum();
            if (total - amount).abs() > SPLIT_TOLERANCE {
                warn!("Rejected split summing to {} for amount {}", total, amount);
                return Err(TripError::validation(format!(
                    "splits add up to {total}, expected {amount}"
                )));
            }
            custom.iter().map(|s| (s.user_id, s.amount_owed)).collect()
        }
    };

    Ok(shares
        .into_iter()
        .map(|(user_id, amount_owed)| {
            let is_payer = user_id == paid_by;
            ExpenseSplit {
                expense_id,
                user_id,
                amount_owed,
                amount_paid: if is_payer { amount_owed } else { Decimal::ZERO },
                is_settled: is_payer,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tripsync_db::Database;
    use tripsync_types::ledger::SplitShare;

    fn ledger() -> ExpenseLedger {
        ExpenseLedger::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    fn new_expense(trip_id: Uuid, paid_by: Uuid, amount: Decimal, split: SplitMode) -> NewExpense {
        NewExpense {
            trip_id,
            title: "Dinner".into(),
            amount,
            category: "food".into(),
            description: None,
            paid_by,
            split,
        }
    }

    #[test]
    fn equal_split_hands_out_leftover_cents() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let splits = build_splits(Uuid::nil(), dec!(100), a, &SplitMode::Equal(vec![a, b, c])).unwrap();

        let owed: Vec<Decimal> = splits.iter().map(|s| s.amount_owed).collect();
        assert_eq!(owed, vec![dec!(33.34), dec!(33.33), dec!(33.33)]);
        assert_eq!(owed.iter().copied().sum::<Decimal>(), dec!(100));

        assert!(splits[0].is_settled);
        assert_eq!(splits[0].amount_paid, splits[0].amount_owed);
        assert!(!splits[1].is_settled);
        assert_eq!(splits[1].amount_paid, Decimal::ZERO);
    }

    #[test]
    fn custom_split_must_add_up() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let shares = |x: Decimal, y: Decimal| {
            SplitMode::Custom(vec![
                SplitShare { user_id: a, amount_owed: x },
                SplitShare { user_id: b, amount_owed: y },
            ])
        };

        assert!(build_splits(Uuid::nil(), dec!(50), a, &shares(dec!(25), dec!(25))).is_ok());
        assert!(build_splits(Uuid::nil(), dec!(50), a, &shares(dec!(25), dec!(24.99))).is_ok());
        let err = build_splits(Uuid::nil(), dec!(50), a, &shares(dec!(25), dec!(24.98))).unwrap_err();
        assert!(matches!(err, TripError::Validation(_)));
    }

    #[tokio::test]
    async fn create_update_delete_round_trip() {
        let ledger = ledger();
        let trip = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let created = ledger
            .create_expense(new_expense(trip, a, dec!(60), SplitMode::Equal(vec![a, b])))
            .await
            .unwrap();
        assert_eq!(created.splits.len(), 2);

        let updated = ledger
            .update_expense(
                created.expense.id,
                new_expense(trip, b, dec!(90), SplitMode::Equal(vec![a, b])),
            )
            .await
            .unwrap();
        assert_eq!(updated.expense.created_at, created.expense.created_at);

        let fetched = ledger.get_expense(created.expense.id).await.unwrap().unwrap();
        assert_eq!(fetched.expense.amount, dec!(90));
        assert_eq!(fetched.expense.paid_by, b);
        let payer_row = fetched.splits.iter().find(|s| s.user_id == b).unwrap();
        assert!(payer_row.is_settled);

        ledger.delete_expense(created.expense.id).await.unwrap();
        assert!(ledger.list_expenses(trip).await.unwrap().is_empty());
        assert!(matches!(
            ledger.delete_expense(created.expense.id).await,
            Err(TripError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn invalid_update_leaves_expense_untouched() {
        let ledger = ledger();
        let trip = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let created = ledger
            .create_expense(new_expense(trip, a, dec!(40), SplitMode::Equal(vec![a, b])))
            .await
            .unwrap();

        let bad = SplitMode::Custom(vec![SplitShare { user_id: b, amount_owed: dec!(10) }]);
        assert!(ledger
            .update_expense(created.expense.id, new_expense(trip, a, dec!(40), bad))
            .await
            .is_err());
        assert_eq!(
            ledger.get_expense(created.expense.id).await.unwrap().unwrap().splits.len(),
            2
        );
    }

    #[tokio::test]
    async fn personal_expense_has_no_splits() {
        let ledger = ledger();
        let a = Uuid::new_v4();
        let created = ledger
            .create_expense(new_expense(Uuid::new_v4(), a, dec!(12.50), SplitMode::Personal))
            .await
            .unwrap();
        assert!(created.expense.is_personal);
        assert!(created.splits.is_empty());
    }

    #[tokio::test]
    async fn budget_is_upserted() {
        let ledger = ledger();
        let (trip, a) = (Uuid::new_v4(), Uuid::new_v4());
        ledger.set_budget(trip, a, dec!(500)).await.unwrap();
        ledger.set_budget(trip, a, dec!(750)).await.unwrap();
        assert_eq!(
            ledger.get_budget(trip, a).await.unwrap().unwrap().budget_limit,
            dec!(750)
        );
        assert!(ledger.set_budget(trip, a, dec!(-1)).await.is_err());
    }
}
