use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub title: String,
    pub amount: Decimal,
    pub category: String,
    pub description: Option<String>,
    pub paid_by: Uuid,
    /// Personal expenses have no splits and only count toward the payer's
    /// own budget.
    pub is_personal: bool,
    pub created_at: DateTime<Utc>,
}

/// One participant's share of a shared expense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseSplit {
    pub expense_id: Uuid,
    pub user_id: Uuid,
    pub amount_owed: Decimal,
    pub amount_paid: Decimal,
    pub is_settled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseWithSplits {
    pub expense: Expense,
    pub splits: Vec<ExpenseSplit>,
}

/// A per-participant share as requested by the caller, before the payer's row
/// is marked settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitShare {
    pub user_id: Uuid,
    pub amount_owed: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "shares", rename_all = "snake_case")]
pub enum SplitMode {
    /// Divide the amount evenly between these participants.
    Equal(Vec<Uuid>),
    /// Explicit shares; must sum to the expense amount within a cent.
    Custom(Vec<SplitShare>),
    Personal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewExpense {
    pub trip_id: Uuid,
    pub title: String,
    pub amount: Decimal,
    pub category: String,
    pub description: Option<String>,
    pub paid_by: Uuid,
    pub split: SplitMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub trip_id: Uuid,
    pub user_id: Uuid,
    pub budget_limit: Decimal,
}

/// Undo deletes the marker, so a stored payment is always `Paid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paid => "paid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "paid" => Some(Self::Paid),
            _ => None,
        }
    }
}

/// "Marked as paid" marker layered over netted balances. Never alters the
/// underlying expense or split rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtPayment {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub amount: Decimal,
    pub paid_at: DateTime<Utc>,
    pub status: PaymentStatus,
}

/// Audit row written when a suggested settlement is marked settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub amount: Decimal,
    pub settled_at: DateTime<Utc>,
}
