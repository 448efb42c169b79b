use std::collections::HashMap;

use anyhow::Result;
use rusqlite::{Connection, Transaction};
use uuid::Uuid;

use tripsync_types::ledger::{
    Budget, DebtPayment, Expense, ExpenseSplit, ExpenseWithSplits, SettlementRecord,
};

use crate::Database;
use crate::models::{ExpenseRow, SplitRow, TransferRow, format_ts, parse_decimal};
use crate::queries::{OptionalExt, as_params, placeholders};

impl Database {
    // -- Expenses --

    /// Insert an expense and its splits atomically.
    pub fn insert_expense(&self, expense: &Expense, splits: &[ExpenseSplit]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO expenses
                    (id, trip_id, title, amount, category, description, paid_by, is_personal, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    expense.id.to_string(),
                    expense.trip_id.to_string(),
                    expense.title,
                    expense.amount.to_string(),
                    expense.category,
                    expense.description,
                    expense.paid_by.to_string(),
                    expense.is_personal,
                    format_ts(&expense.created_at),
                ],
            )?;
            insert_splits(&tx, splits)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Overwrite an expense's fields and replace all of its splits. Returns
    /// false if the expense does not exist.
    pub fn replace_expense(&self, expense: &Expense, splits: &[ExpenseSplit]) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let n = tx.execute(
                "UPDATE expenses SET title = ?1, amount = ?2, category = ?3, description = ?4,
                                     paid_by = ?5, is_personal = ?6
                 WHERE id = ?7",
                rusqlite::params![
                    expense.title,
                    expense.amount.to_string(),
                    expense.category,
                    expense.description,
                    expense.paid_by.to_string(),
                    expense.is_personal,
                    expense.id.to_string(),
                ],
            )?;
            if n == 0 {
                return Ok(false);
            }
            tx.execute(
                "DELETE FROM expense_splits WHERE expense_id = ?1",
                [expense.id.to_string()],
            )?;
            insert_splits(&tx, splits)?;
            tx.commit()?;
            Ok(true)
        })
    }

    /// Delete an expense; its splits cascade.
    pub fn delete_expense(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM expenses WHERE id = ?1", [id.to_string()])?;
            Ok(n == 1)
        })
    }

    pub fn get_expense(&self, id: Uuid) -> Result<Option<ExpenseWithSplits>> {
        self.with_conn(|conn| {
            let rows = query_expense_rows(conn, "id = ?1", &id.to_string())?;
            Ok(attach_splits(conn, rows)?.into_iter().next())
        })
    }

    /// Every expense of a trip, oldest first, each with its splits.
    pub fn list_expenses(&self, trip_id: Uuid) -> Result<Vec<ExpenseWithSplits>> {
        self.with_conn(|conn| {
            let rows = query_expense_rows(conn, "trip_id = ?1", &trip_id.to_string())?;
            attach_splits(conn, rows)
        })
    }

    // -- Budgets --

    pub fn upsert_budget(&self, budget: &Budget) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO budgets (trip_id, user_id, budget_limit) VALUES (?1, ?2, ?3)
                 ON CONFLICT(trip_id, user_id) DO UPDATE SET budget_limit = excluded.budget_limit",
                rusqlite::params![
                    budget.trip_id.to_string(),
                    budget.user_id.to_string(),
                    budget.budget_limit.to_string(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_budget(&self, trip_id: Uuid, user_id: Uuid) -> Result<Option<Budget>> {
        self.with_conn(|conn| {
            let limit: Option<String> = conn
                .query_row(
                    "SELECT budget_limit FROM budgets WHERE trip_id = ?1 AND user_id = ?2",
                    rusqlite::params![trip_id.to_string(), user_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            limit
                .map(|l| -> Result<Budget> {
                    Ok(Budget {
                        trip_id,
                        user_id,
                        budget_limit: parse_decimal(&l)?,
                    })
                })
                .transpose()
        })
    }

    // -- Settlements --

    pub fn insert_settlement(&self, record: &SettlementRecord) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO settlements (id, trip_id, from_user_id, to_user_id, amount, settled_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    record.id.to_string(),
                    record.trip_id.to_string(),
                    record.from_user_id.to_string(),
                    record.to_user_id.to_string(),
                    record.amount.to_string(),
                    format_ts(&record.settled_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn list_settlements(&self, trip_id: Uuid) -> Result<Vec<SettlementRecord>> {
        self.with_conn(|conn| {
            query_transfer_rows(
                conn,
                "SELECT id, trip_id, from_user_id, to_user_id, amount, settled_at, NULL
                 FROM settlements WHERE trip_id = ?1 ORDER BY settled_at ASC",
                trip_id,
            )?
            .into_iter()
            .map(TransferRow::into_settlement)
            .collect()
        })
    }

    // -- Debt payments --

    pub fn insert_debt_payment(&self, payment: &DebtPayment) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO debt_payments (id, trip_id, from_user_id, to_user_id, amount, paid_at, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    payment.id.to_string(),
                    payment.trip_id.to_string(),
                    payment.from_user_id.to_string(),
                    payment.to_user_id.to_string(),
                    payment.amount.to_string(),
                    format_ts(&payment.paid_at),
                    payment.status.as_str(),
                ],
            )?;
            Ok(())
        })
    }

    /// Remove every payment marker from `from_user_id` to `to_user_id`.
    /// Returns the number of markers removed.
    pub fn delete_debt_payments(
        &self,
        trip_id: Uuid,
        from_user_id: Uuid,
        to_user_id: Uuid,
    ) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM debt_payments WHERE trip_id = ?1 AND from_user_id = ?2 AND to_user_id = ?3",
                rusqlite::params![trip_id.to_string(), from_user_id.to_string(), to_user_id.to_string()],
            )?;
            Ok(n)
        })
    }

    pub fn list_debt_payments(&self, trip_id: Uuid) -> Result<Vec<DebtPayment>> {
        self.with_conn(|conn| {
            query_transfer_rows(
                conn,
                "SELECT id, trip_id, from_user_id, to_user_id, amount, paid_at, status
                 FROM debt_payments WHERE trip_id = ?1 ORDER BY paid_at ASC",
                trip_id,
            )?
            .into_iter()
            .map(TransferRow::into_payment)
            .collect()
        })
    }
}

fn insert_splits(tx: &Transaction<'_>, splits: &[ExpenseSplit]) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO expense_splits (expense_id, user_id, amount_owed, amount_paid, is_settled)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for s in splits {
        stmt.execute(rusqlite::params![
            s.expense_id.to_string(),
            s.user_id.to_string(),
            s.amount_owed.to_string(),
            s.amount_paid.to_string(),
            s.is_settled,
        ])?;
    }
    Ok(())
}

fn query_expense_rows(conn: &Connection, filter: &str, key: &str) -> Result<Vec<ExpenseRow>> {
    let sql = format!(
        "SELECT id, trip_id, title, amount, category, description, paid_by, is_personal, created_at
         FROM expenses WHERE {} ORDER BY created_at ASC, id ASC",
        filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([key], |row| {
            Ok(ExpenseRow {
                id: row.get(0)?,
                trip_id: row.get(1)?,
                title: row.get(2)?,
                amount: row.get(3)?,
                category: row.get(4)?,
                description: row.get(5)?,
                paid_by: row.get(6)?,
                is_personal: row.get(7)?,
                created_at: row.get(8)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn attach_splits(conn: &Connection, rows: Vec<ExpenseRow>) -> Result<Vec<ExpenseWithSplits>> {
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let mut by_expense: HashMap<String, Vec<SplitRow>> = HashMap::new();

    if !ids.is_empty() {
        let sql = format!(
            "SELECT expense_id, user_id, amount_owed, amount_paid, is_settled
             FROM expense_splits WHERE expense_id IN ({}) ORDER BY rowid ASC",
            placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let splits = stmt
            .query_map(as_params(&ids).as_slice(), |row| {
                Ok(SplitRow {
                    expense_id: row.get(0)?,
                    user_id: row.get(1)?,
                    amount_owed: row.get(2)?,
                    amount_paid: row.get(3)?,
                    is_settled: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for s in splits {
            by_expense.entry(s.expense_id.clone()).or_default().push(s);
        }
    }

    rows.into_iter()
        .map(|row| {
            let key = row.id.clone();
            let expense = row.into_expense()?;
            let splits = by_expense
                .remove(&key)
                .unwrap_or_default()
                .into_iter()
                .map(SplitRow::into_split)
                .collect::<Result<_>>()?;
            Ok(ExpenseWithSplits { expense, splits })
        })
        .collect()
}

fn query_transfer_rows(conn: &Connection, sql: &str, trip_id: Uuid) -> Result<Vec<TransferRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([trip_id.to_string()], |row| {
            Ok(TransferRow {
                id: row.get(0)?,
                trip_id: row.get(1)?,
                from_user_id: row.get(2)?,
                to_user_id: row.get(3)?,
                amount: row.get(4)?,
                at: row.get(5)?,
                status: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
