use anyhow::Result;
use uuid::Uuid;

use tripsync_db::Database;
use tripsync_types::ledger::{
    Budget, DebtPayment, Expense, ExpenseSplit, ExpenseWithSplits, SettlementRecord,
};

/// Blocking persistence for the ledger.
pub trait LedgerStore: Send + Sync + 'static {
    fn insert_expense(&self, expense: &Expense, splits: &[ExpenseSplit]) -> Result<()>;
    /// Returns false when the expense does not exist.
    fn replace_expense(&self, expense: &Expense, splits: &[ExpenseSplit]) -> Result<bool>;
    fn delete_expense(&self, id: Uuid) -> Result<bool>;
    fn get_expense(&self, id: Uuid) -> Result<Option<ExpenseWithSplits>>;
    fn list_expenses(&self, trip_id: Uuid) -> Result<Vec<ExpenseWithSplits>>;

    fn upsert_budget(&self, budget: &Budget) -> Result<()>;
    fn get_budget(&self, trip_id: Uuid, user_id: Uuid) -> Result<Option<Budget>>;

    fn insert_settlement(&self, record: &SettlementRecord) -> Result<()>;
    fn list_settlements(&self, trip_id: Uuid) -> Result<Vec<SettlementRecord>>;

    fn insert_debt_payment(&self, payment: &DebtPayment) -> Result<()>;
    fn delete_debt_payments(&self, trip_id: Uuid, from_user_id: Uuid, to_user_id: Uuid)
    -> Result<usize>;
    fn list_debt_payments(&self, trip_id: Uuid) -> Result<Vec<DebtPayment>>;
}

impl LedgerStore for Database {
    fn insert_expense(&self, expense: &Expense, splits: &[ExpenseSplit]) -> Result<()> {
        Database::insert_expense(self, expense, splits)
    }

    fn replace_expense(&self, expense: &Expense, splits: &[ExpenseSplit]) -> Result<bool> {
        Database::replace_expense(self, expense, splits)
    }

    fn delete_expense(&self, id: Uuid) -> Result<bool> {
        Database::delete_expense(self, id)
    }

    fn get_expense(&self, id: Uuid) -> Result<Option<ExpenseWithSplits>> {
        Database::get_expense(self, id)
    }

    fn list_expenses(&self, trip_id: Uuid) -> Result<Vec<ExpenseWithSplits>> {
        Database::list_expenses(self, trip_id)
    }

    fn upsert_budget(&self, budget: &Budget) -> Result<()> {
        Database::upsert_budget(self, budget)
    }

    fn get_budget(&self, trip_id: Uuid, user_id: Uuid) -> Result<Option<Budget>> {
        Database::get_budget(self, trip_id, user_id)
    }

    fn insert_settlement(&self, record: &SettlementRecord) -> Result<()> {
        Database::insert_settlement(self, record)
    }

    fn list_settlements(&self, trip_id: Uuid) -> Result<Vec<SettlementRecord>> {
        Database::list_settlements(self, trip_id)
    }

    fn insert_debt_payment(&self, payment: &DebtPayment) -> Result<()> {
        Database::insert_debt_payment(self, payment)
    }

    fn delete_debt_payments(
        &self,
        trip_id: Uuid,
        from_user_id: Uuid,
        to_user_id: Uuid,
    ) -> Result<usize> {
        Database::delete_debt_payments(self, trip_id, from_user_id, to_user_id)
    }

    fn list_debt_payments(&self, trip_id: Uuid) -> Result<Vec<DebtPayment>> {
        Database::list_debt_payments(self, trip_id)
    }
}
