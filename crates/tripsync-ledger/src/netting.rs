//! Pure balance arithmetic over a trip's expenses. Nothing here touches the
//! store; callers pass in whatever they fetched.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tripsync_types::ledger::ExpenseWithSplits;

/// Gross position of one member across all shared expenses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBalance {
    pub user_id: Uuid,
    pub total_paid: Decimal,
    pub total_owed: Decimal,
    /// `total_paid - total_owed`; positive means others owe this member.
    pub balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementSuggestion {
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub amount: Decimal,
}

/// One counterparty's position relative to the user a breakdown is for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberNet {
    pub user_id: Uuid,
    pub owes_me: Decimal,
    pub i_owe: Decimal,
    /// `owes_me - i_owe`, rounded to cents.
    pub net_owes_me: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtBreakdown {
    pub user_id: Uuid,
    /// Members with a positive net, largest first.
    pub members_who_owe_me: Vec<MemberNet>,
    /// Members with a negative net, largest debt first.
    pub members_i_owe: Vec<MemberNet>,
    /// Sum of the positive nets.
    pub total_owed_to_me: Decimal,
    /// Sum of the absolute negative nets.
    pub total_i_owe: Decimal,
    pub net_balance: Decimal,
}

/// Paid minus owed for every member that appears in a shared expense.
///
/// A member's paid side is the full amount of each shared expense they paid
/// for; the owed side is the sum of their split rows. Personal expenses are
/// ignored. Sorted by user id.
pub fn compute_balances(expenses: &[ExpenseWithSplits]) -> Vec<UserBalance> {
    let mut totals: BTreeMap<Uuid, (Decimal, Decimal)> = BTreeMap::new();

    for item in expenses.iter().filter(|e| !e.expense.is_personal) {
        totals.entry(item.expense.paid_by).or_default().0 += item.expense.amount;
        for split in &item.splits {
            totals.entry(split.user_id).or_default().1 += split.amount_owed;
        }
    }

    totals
        .into_iter()
        .map(|(user_id, (total_paid, total_owed))| UserBalance {
            user_id,
            total_paid,
            total_owed,
            balance: total_paid - total_owed,
        })
        .collect()
}

/// Greedy settlement: repeatedly match the largest remaining debtor with the
/// largest remaining creditor.
///
/// Not guaranteed to use the fewest possible transfers, but every debt is
/// covered and the total moved equals `min(total debt, total credit)`.
pub fn suggest_settlements(balances: &[UserBalance]) -> Vec<SettlementSuggestion> {
    let mut debtors: Vec<(Uuid, Decimal)> = balances
        .iter()
        .filter(|b| b.balance < Decimal::ZERO)
        .map(|b| (b.user_id, -b.balance))
        .collect();
    let mut creditors: Vec<(Uuid, Decimal)> = balances
        .iter()
        .filter(|b| b.balance > Decimal::ZERO)
        .map(|b| (b.user_id, b.balance))
        .collect();
    debtors.sort_by(largest_first);
    creditors.sort_by(largest_first);

    let mut settlements = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < debtors.len() && j < creditors.len() {
        let amount = debtors[i].1.min(creditors[j].1);
        if amount > Decimal::ZERO {
            settlements.push(SettlementSuggestion {
                from_user_id: debtors[i].0,
                to_user_id: creditors[j].0,
                amount,
            });
        }
        debtors[i].1 -= amount;
        creditors[j].1 -= amount;
        if debtors[i].1 <= Decimal::ZERO {
            i += 1;
        }
        if creditors[j].1 <= Decimal::ZERO {
            j += 1;
        }
    }
    settlements
}

// Ties broken by id so the output is deterministic
fn largest_first(a: &(Uuid, Decimal), b: &(Uuid, Decimal)) -> Ordering {
    b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}

/// How `user_id` stands against each other member.
///
/// On expenses the user paid, their own share is `amount / participants`
/// and the rest is spread over the other participants in proportion to
/// their split. On expenses someone else paid, the user's split is owed to
/// the payer. Totals are summed from the rounded per-member nets so the
/// headline figures always match the rows.
pub fn detailed_breakdown(expenses: &[ExpenseWithSplits], user_id: Uuid) -> DebtBreakdown {
    let mut owes_me: HashMap<Uuid, Decimal> = HashMap::new();
    let mut i_owe: HashMap<Uuid, Decimal> = HashMap::new();

    for item in expenses.iter().filter(|e| !e.expense.is_personal) {
        let expense = &item.expense;
        if item.splits.is_empty() {
            continue;
        }

        if expense.paid_by == user_id {
            let own_share = expense.amount / Decimal::from(item.splits.len());
            let remainder = expense.amount - own_share;
            let others: Vec<_> = item.splits.iter().filter(|s| s.user_id != user_id).collect();
            let others_total: Decimal = others.iter().map(|s| s.amount_owed).sum();
            if others_total <= Decimal::ZERO {
                continue;
            }
            for split in others {
                *owes_me.entry(split.user_id).or_default() +=
                    remainder * split.amount_owed / others_total;
            }
        } else if let Some(mine) = item.splits.iter().find(|s| s.user_id == user_id) {
            *i_owe.entry(expense.paid_by).or_default() += mine.amount_owed;
        }
    }

    let mut members: Vec<MemberNet> = owes_me
        .keys()
        .chain(i_owe.keys())
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(|member| {
            let owed_to_me = owes_me.get(&member).copied().unwrap_or_default();
            let owed_by_me = i_owe.get(&member).copied().unwrap_or_default();
            MemberNet {
                user_id: member,
                owes_me: cents(owed_to_me),
                i_owe: cents(owed_by_me),
                net_owes_me: cents(owed_to_me - owed_by_me),
            }
        })
        .collect();
    members.sort_by(|a, b| {
        b.net_owes_me
            .abs()
            .cmp(&a.net_owes_me.abs())
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    let (members_who_owe_me, rest): (Vec<_>, Vec<_>) = members
        .into_iter()
        .partition(|m| m.net_owes_me > Decimal::ZERO);
    let members_i_owe: Vec<MemberNet> = rest
        .into_iter()
        .filter(|m| m.net_owes_me < Decimal::ZERO)
        .collect();

    let total_owed_to_me: Decimal = members_who_owe_me.iter().map(|m| m.net_owes_me).sum();
    let total_i_owe: Decimal = members_i_owe.iter().map(|m| m.net_owes_me.abs()).sum();

    DebtBreakdown {
        user_id,
        members_who_owe_me,
        members_i_owe,
        total_owed_to_me,
        total_i_owe,
        net_balance: total_owed_to_me - total_i_owe,
    }
}

/// Round half away from zero to whole cents.
pub fn cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tripsync_types::ledger::{Expense, ExpenseSplit};

    fn shared(paid_by: Uuid, amount: Decimal, shares: &[(Uuid, Decimal)]) -> ExpenseWithSplits {
        let id = Uuid::new_v4();
        ExpenseWithSplits {
            expense: Expense {
                id,
                trip_id: Uuid::nil(),
                title: "x".into(),
                amount,
                category: "food".into(),
                description: None,
                paid_by,
                is_personal: false,
                created_at: Utc::now(),
            },
            splits: shares
                .iter()
                .map(|(user_id, owed)| ExpenseSplit {
                    expense_id: id,
                    user_id: *user_id,
                    amount_owed: *owed,
                    amount_paid: if *user_id == paid_by { *owed } else { Decimal::ZERO },
                    is_settled: *user_id == paid_by,
                })
                .collect(),
        }
    }

    fn trio() -> (Uuid, Uuid, Uuid, Vec<ExpenseWithSplits>) {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let expenses = vec![
            shared(a, dec!(90), &[(a, dec!(30)), (b, dec!(30)), (c, dec!(30))]),
            shared(b, dec!(30), &[(a, dec!(10)), (b, dec!(10)), (c, dec!(10))]),
        ];
        (a, b, c, expenses)
    }

    fn balance_of(balances: &[UserBalance], user: Uuid) -> Decimal {
        balances.iter().find(|b| b.user_id == user).unwrap().balance
    }

    #[test]
    fn dinner_and_taxi_balances() {
        let (a, b, c, expenses) = trio();
        let balances = compute_balances(&expenses);
        assert_eq!(balance_of(&balances, a), dec!(50));
        assert_eq!(balance_of(&balances, b), dec!(-10));
        assert_eq!(balance_of(&balances, c), dec!(-40));
    }

    #[test]
    fn dinner_and_taxi_settlements() {
        let (a, b, c, expenses) = trio();
        let settlements = suggest_settlements(&compute_balances(&expenses));
        assert_eq!(
            settlements,
            vec![
                SettlementSuggestion { from_user_id: c, to_user_id: a, amount: dec!(40) },
                SettlementSuggestion { from_user_id: b, to_user_id: a, amount: dec!(10) },
            ]
        );
    }

    #[test]
    fn settlements_clear_every_balance() {
        let users: Vec<Uuid> = (0..6).map(|_| Uuid::new_v4()).collect();
        let amounts = [dec!(-37.45), dec!(12.10), dec!(-5.05), dec!(60.00), dec!(-29.60), dec!(0)];
        let balances: Vec<UserBalance> = users
            .iter()
            .zip(amounts)
            .map(|(u, amount)| UserBalance {
                user_id: *u,
                total_paid: Decimal::ZERO,
                total_owed: Decimal::ZERO,
                balance: amount,
            })
            .collect();

        let settlements = suggest_settlements(&balances);
        let total: Decimal = settlements.iter().map(|s| s.amount).sum();
        assert_eq!(total, dec!(72.10));

        let mut remaining: HashMap<Uuid, Decimal> =
            balances.iter().map(|b| (b.user_id, b.balance)).collect();
        for s in &settlements {
            *remaining.get_mut(&s.from_user_id).unwrap() += s.amount;
            *remaining.get_mut(&s.to_user_id).unwrap() -= s.amount;
        }
        assert!(remaining.values().all(|r| r.is_zero()));
    }

    #[test]
    fn breakdown_matches_worked_example() {
        let (a, b, c, expenses) = trio();
        let breakdown = detailed_breakdown(&expenses, a);

        let nets: Vec<(Uuid, Decimal)> = breakdown
            .members_who_owe_me
            .iter()
            .map(|m| (m.user_id, m.net_owes_me))
            .collect();
        assert_eq!(nets, vec![(c, dec!(30)), (b, dec!(20))]);
        assert!(breakdown.members_i_owe.is_empty());
        assert_eq!(breakdown.net_balance, dec!(50));
    }

    #[test]
    fn headline_totals_come_from_member_rows() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let expenses = vec![
            shared(a, dec!(100), &[(a, dec!(33.34)), (b, dec!(33.33)), (c, dec!(33.33))]),
            shared(b, dec!(75), &[(a, dec!(50)), (b, dec!(25))]),
            shared(c, dec!(10), &[(a, dec!(5)), (c, dec!(5))]),
        ];
        let breakdown = detailed_breakdown(&expenses, a);

        let owed: Decimal = breakdown.members_who_owe_me.iter().map(|m| m.net_owes_me).sum();
        let owing: Decimal = breakdown.members_i_owe.iter().map(|m| m.net_owes_me.abs()).sum();
        assert_eq!(owed - owing, breakdown.net_balance);
        assert_eq!(owed, breakdown.total_owed_to_me);
        assert_eq!(owing, breakdown.total_i_owe);
        assert!(breakdown.members_i_owe.iter().any(|m| m.user_id == b));
    }

    #[test]
    fn personal_expenses_do_not_move_balances() {
        let a = Uuid::new_v4();
        let mut personal = shared(a, dec!(20), &[]);
        personal.expense.is_personal = true;
        assert!(compute_balances(&[personal.clone()]).is_empty());
        assert_eq!(detailed_breakdown(&[personal], a).net_balance, Decimal::ZERO);
    }
}
