use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tripsync_types::ledger::{Budget, ExpenseWithSplits};

use crate::netting::cents;

/// Spending alerts start at this share of the budget.
const WARNING_PERCENT: Decimal = Decimal::from_parts(80, 0, 0, false, 0);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSummary {
    /// Zero when no budget has been set.
    pub budget_limit: Decimal,
    /// The member's own split rows across shared expenses.
    pub shared_spent: Decimal,
    /// Personal expenses the member paid.
    pub personal_spent: Decimal,
    pub total_spent: Decimal,
    pub remaining: Decimal,
    /// Share of the budget spent, to two decimals; zero with no budget.
    pub percentage: Decimal,
    pub is_over_budget: bool,
    pub warning_threshold: bool,
}

pub fn summarize(
    expenses: &[ExpenseWithSplits],
    user_id: Uuid,
    budget: Option<&Budget>,
) -> BudgetSummary {
    let shared_spent: Decimal = expenses
        .iter()
        .filter(|e| !e.expense.is_personal)
        .flat_map(|e| e.splits.iter())
        .filter(|s| s.user_id == user_id)
        .map(|s| s.amount_owed)
        .sum();
    let personal_spent: Decimal = expenses
        .iter()
        .filter(|e| e.expense.is_personal && e.expense.paid_by == user_id)
        .map(|e| e.expense.amount)
        .sum();
    let total_spent = shared_spent + personal_spent;

    let budget_limit = budget.map_or(Decimal::ZERO, |b| b.budget_limit);
    let exact_percentage = if budget_limit > Decimal::ZERO {
        total_spent / budget_limit * Decimal::ONE_HUNDRED
    } else {
        Decimal::ZERO
    };

    BudgetSummary {
        budget_limit,
        shared_spent,
        personal_spent,
        total_spent,
        remaining: budget_limit - total_spent,
        percentage: cents(exact_percentage),
        is_over_budget: total_spent > budget_limit,
        // Compared before rounding so 79.996% is not a warning
        warning_threshold: exact_percentage >= WARNING_PERCENT,
    }
}
