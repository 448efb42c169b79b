use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use tripsync_types::ledger::{DebtPayment, PaymentStatus, SettlementRecord};
use tripsync_types::{Result, TripError};

use crate::blocking;
use crate::ledger::{ExpenseLedger, SPLIT_TOLERANCE};
use crate::netting::{self, DebtBreakdown, MemberNet, SettlementSuggestion};
use crate::store::LedgerStore;

/// A greedy suggestion together with the audit row that marked it settled,
/// if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestionStatus {
    pub suggestion: SettlementSuggestion,
    pub settled: Option<SettlementRecord>,
}

/// A breakdown row joined with its latest "paid" marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberStatus {
    pub member: MemberNet,
    pub payment: Option<DebtPayment>,
}

impl MemberStatus {
    pub fn is_paid(&self) -> bool {
        self.payment.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakdownWithStatus {
    pub breakdown: DebtBreakdown,
    pub members_who_owe_me: Vec<MemberStatus>,
    pub members_i_owe: Vec<MemberStatus>,
}

/// Records settlements and payments as annotations over computed balances.
///
/// Expenses and splits are never modified here, so balances are always
/// recomputed from the expenses and "paid" status is joined in at read time.
#[derive(Clone)]
pub struct PaymentTracker {
    store: Arc<dyn LedgerStore>,
    ledger: ExpenseLedger,
}

impl PaymentTracker {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            ledger: ExpenseLedger::new(store.clone()),
            store,
        }
    }

    /// Write an audit row for a suggested settlement.
    pub async fn mark_settlement_settled(
        &self,
        trip_id: Uuid,
        suggestion: &SettlementSuggestion,
    ) -> Result<SettlementRecord> {
        validate_transfer(suggestion.from_user_id, suggestion.to_user_id, suggestion.amount)?;
        let record = SettlementRecord {
            id: Uuid::new_v4(),
            trip_id,
            from_user_id: suggestion.from_user_id,
            to_user_id: suggestion.to_user_id,
            amount: suggestion.amount,
            settled_at: Utc::now(),
        };
        let stored = record.clone();
        blocking(&self.store, move |store| store.insert_settlement(&stored)).await?;
        info!(
            "Settlement {} -> {} of {} marked on trip {}",
            record.from_user_id, record.to_user_id, record.amount, trip_id
        );
        Ok(record)
    }

    pub async fn list_settlements(&self, trip_id: Uuid) -> Result<Vec<SettlementRecord>> {
        blocking(&self.store, move |store| store.list_settlements(trip_id)).await
    }

    /// Current greedy suggestions, each annotated with a matching audit row.
    pub async fn settlement_suggestions(&self, trip_id: Uuid) -> Result<Vec<SuggestionStatus>> {
        let suggestions = self.ledger.suggest_settlements(trip_id).await?;
        let records = self.list_settlements(trip_id).await?;

        Ok(suggestions
            .into_iter()
            .map(|suggestion| {
                let settled = records
                    .iter()
                    .rev()
                    .find(|r| {
                        r.from_user_id == suggestion.from_user_id
                            && r.to_user_id == suggestion.to_user_id
                            && (r.amount - suggestion.amount).abs() <= SPLIT_TOLERANCE
                    })
                    .cloned();
                SuggestionStatus { suggestion, settled }
            })
            .collect())
    }

    /// The creditor records that `debtor` has paid them.
    pub async fn mark_member_paid(
        &self,
        trip_id: Uuid,
        creditor: Uuid,
        debtor: Uuid,
        amount: Decimal,
    ) -> Result<DebtPayment> {
        self.record_payment(trip_id, debtor, creditor, amount).await
    }

    /// The debtor records their own payment to `creditor`.
    pub async fn mark_i_paid(
        &self,
        trip_id: Uuid,
        debtor: Uuid,
        creditor: Uuid,
        amount: Decimal,
    ) -> Result<DebtPayment> {
        self.record_payment(trip_id, debtor, creditor, amount).await
    }

    /// Drop every payment marker from `from_user_id` to `to_user_id`.
    pub async fn undo_payment(
        &self,
        trip_id: Uuid,
        from_user_id: Uuid,
        to_user_id: Uuid,
    ) -> Result<()> {
        let removed = blocking(&self.store, move |store| {
            store.delete_debt_payments(trip_id, from_user_id, to_user_id)
        })
        .await?;
        if removed == 0 {
            return Err(TripError::NotFound(format!(
                "payment {from_user_id} -> {to_user_id}"
            )));
        }
        info!(
            "Undid {} payment marker(s) {} -> {} on trip {}",
            removed, from_user_id, to_user_id, trip_id
        );
        Ok(())
    }

    /// `user_id`'s breakdown with each row's latest paid marker attached.
    pub async fn breakdown_with_status(
        &self,
        trip_id: Uuid,
        user_id: Uuid,
    ) -> Result<BreakdownWithStatus> {
        let expenses = self.ledger.list_expenses(trip_id).await?;
        let payments = blocking(&self.store, move |store| store.list_debt_payments(trip_id)).await?;
        let breakdown = netting::detailed_breakdown(&expenses, user_id);

        let latest = |from: Uuid, to: Uuid| {
            payments
                .iter()
                .rev()
                .find(|p| {
                    p.status == PaymentStatus::Paid && p.from_user_id == from && p.to_user_id == to
                })
                .cloned()
        };

        let members_who_owe_me = breakdown
            .members_who_owe_me
            .iter()
            .map(|m| MemberStatus {
                member: m.clone(),
                payment: latest(m.user_id, user_id),
            })
            .collect();
        let members_i_owe = breakdown
            .members_i_owe
            .iter()
            .map(|m| MemberStatus {
                member: m.clone(),
                payment: latest(user_id, m.user_id),
            })
            .collect();

        Ok(BreakdownWithStatus {
            breakdown,
            members_who_owe_me,
            members_i_owe,
        })
    }

    async fn record_payment(
        &self,
        trip_id: Uuid,
        from_user_id: Uuid,
        to_user_id: Uuid,
        amount: Decimal,
    ) -> Result<DebtPayment> {
        validate_transfer(from_user_id, to_user_id, amount)?;
        let payment = DebtPayment {
            id: Uuid::new_v4(),
            trip_id,
            from_user_id,
            to_user_id,
            amount,
            paid_at: Utc::now(),
            status: PaymentStatus::Paid,
        };
        let stored = payment.clone();
        blocking(&self.store, move |store| store.insert_debt_payment(&stored)).await?;
        info!(
            "Payment {} -> {} of {} recorded on trip {}",
            from_user_id, to_user_id, amount, trip_id
        );
        Ok(payment)
    }
}

fn validate_transfer(from: Uuid, to: Uuid, amount: Decimal) -> Result<()> {
    if from == to {
        return Err(TripError::validation("cannot settle with yourself"));
    }
    if amount <= Decimal::ZERO {
        return Err(TripError::validation("payment amount must be positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tripsync_db::Database;
    use tripsync_types::ledger::{NewExpense, SplitMode};

    struct Trip {
        id: Uuid,
        a: Uuid,
        b: Uuid,
        c: Uuid,
        tracker: PaymentTracker,
    }

    // A pays a 90 dinner, B pays a 30 taxi, both split three ways.
    async fn trip() -> Trip {
        let store: Arc<dyn LedgerStore> = Arc::new(Database::open_in_memory().unwrap());
        let ledger = ExpenseLedger::new(store.clone());
        let (id, a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        for (payer, amount, title) in [(a, dec!(90), "Dinner"), (b, dec!(30), "Taxi")] {
            ledger
                .create_expense(NewExpense {
                    trip_id: id,
                    title: title.into(),
                    amount,
                    category: "food".into(),
                    description: None,
                    paid_by: payer,
                    split: SplitMode::Equal(vec![a, b, c]),
                })
                .await
                .unwrap();
        }
        Trip {
            id,
            a,
            b,
            c,
            tracker: PaymentTracker::new(store),
        }
    }

    #[tokio::test]
    async fn settled_suggestion_is_annotated() {
        let t = trip().await;
        let before = t.tracker.settlement_suggestions(t.id).await.unwrap();
        assert_eq!(before.len(), 2);
        assert!(before.iter().all(|s| s.settled.is_none()));

        let first = before[0].suggestion.clone();
        assert_eq!((first.from_user_id, first.to_user_id), (t.c, t.a));
        let record = t.tracker.mark_settlement_settled(t.id, &first).await.unwrap();

        let after = t.tracker.settlement_suggestions(t.id).await.unwrap();
        assert_eq!(after[0].settled.as_ref(), Some(&record));
        assert!(after[1].settled.is_none());
        assert_eq!(t.tracker.list_settlements(t.id).await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn marking_paid_leaves_balances_alone() {
        let t = trip().await;
        t.tracker
            .mark_member_paid(t.id, t.a, t.c, dec!(30))
            .await
            .unwrap();

        let view = t.tracker.breakdown_with_status(t.id, t.a).await.unwrap();
        assert_eq!(view.breakdown.net_balance, dec!(50));
        let c_row = view
            .members_who_owe_me
            .iter()
            .find(|m| m.member.user_id == t.c)
            .unwrap();
        assert!(c_row.is_paid());
        let b_row = view
            .members_who_owe_me
            .iter()
            .find(|m| m.member.user_id == t.b)
            .unwrap();
        assert!(!b_row.is_paid());
    }

    #[tokio::test]
    async fn i_paid_shows_on_both_sides_until_undone() {
        let t = trip().await;
        t.tracker.mark_i_paid(t.id, t.c, t.b, dec!(10)).await.unwrap();

        let payer_view = t.tracker.breakdown_with_status(t.id, t.c).await.unwrap();
        let to_b = payer_view
            .members_i_owe
            .iter()
            .find(|m| m.member.user_id == t.b)
            .unwrap();
        assert_eq!(to_b.payment.as_ref().map(|p| p.amount), Some(dec!(10)));

        let payee_view = t.tracker.breakdown_with_status(t.id, t.b).await.unwrap();
        assert!(
            payee_view
                .members_who_owe_me
                .iter()
                .any(|m| m.member.user_id == t.c && m.is_paid())
        );

        t.tracker.undo_payment(t.id, t.c, t.b).await.unwrap();
        let payer_view = t.tracker.breakdown_with_status(t.id, t.c).await.unwrap();
        assert!(payer_view.members_i_owe.iter().all(|m| !m.is_paid()));

        let err = t.tracker.undo_payment(t.id, t.c, t.b).await.unwrap_err();
        assert!(matches!(err, TripError::NotFound(_)));
    }

    #[tokio::test]
    async fn rejects_bad_transfers() {
        let t = trip().await;
        let err = t
            .tracker
            .mark_i_paid(t.id, t.a, t.a, dec!(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TripError::Validation(_)));
        let err = t
            .tracker
            .mark_member_paid(t.id, t.a, t.b, Decimal::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, TripError::Validation(_)));
    }
}
