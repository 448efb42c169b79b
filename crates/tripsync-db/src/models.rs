//! Database row types. These map directly to SQLite rows and are kept apart
//! from the `tripsync-types` models so the storage layer stays independent.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use tripsync_types::ledger::{
    DebtPayment, Expense, ExpenseSplit, PaymentStatus, SettlementRecord,
};
use tripsync_types::models::{Attachment, Message, Profile, Reaction};

pub struct MessageRow {
    pub id: String,
    pub trip_id: String,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub sender_avatar: Option<String>,
    pub message: String,
    pub encrypted: bool,
    pub created_at: String,
    pub edited_at: Option<String>,
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message> {
        let sender_id = parse_uuid(&self.sender_id)?;
        Ok(Message {
            id: parse_uuid(&self.id)?,
            trip_id: parse_uuid(&self.trip_id)?,
            sender_id,
            sender: self.sender_name.map(|display_name| Profile {
                id: sender_id,
                display_name,
                avatar_url: self.sender_avatar,
            }),
            message: self.message,
            encrypted: self.encrypted,
            attachments: vec![],
            reactions: vec![],
            created_at: parse_ts(&self.created_at)?,
            edited_at: self.edited_at.as_deref().map(parse_ts).transpose()?,
            read_by: vec![],
        })
    }
}

pub struct AttachmentRow {
    pub message_id: String,
    pub file_url: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
    pub uploaded_by: String,
}

impl AttachmentRow {
    pub fn into_attachment(self) -> Result<Attachment> {
        Ok(Attachment {
            file_url: self.file_url,
            file_name: self.file_name,
            file_type: self.file_type,
            file_size: self.file_size,
            uploaded_by: parse_uuid(&self.uploaded_by)?,
        })
    }
}

pub struct ReactionRow {
    pub id: String,
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
    pub user_name: Option<String>,
    pub user_avatar: Option<String>,
}

impl ReactionRow {
    pub fn into_reaction(self) -> Result<Reaction> {
        let user_id = parse_uuid(&self.user_id)?;
        Ok(Reaction {
            id: parse_uuid(&self.id)?,
            message_id: parse_uuid(&self.message_id)?,
            user_id,
            emoji: self.emoji,
            user: self.user_name.map(|display_name| Profile {
                id: user_id,
                display_name,
                avatar_url: self.user_avatar,
            }),
        })
    }
}

pub struct ExpenseRow {
    pub id: String,
    pub trip_id: String,
    pub title: String,
    pub amount: String,
    pub category: String,
    pub description: Option<String>,
    pub paid_by: String,
    pub is_personal: bool,
    pub created_at: String,
}

impl ExpenseRow {
    pub fn into_expense(self) -> Result<Expense> {
        Ok(Expense {
            id: parse_uuid(&self.id)?,
            trip_id: parse_uuid(&self.trip_id)?,
            title: self.title,
            amount: parse_decimal(&self.amount)?,
            category: self.category,
            description: self.description,
            paid_by: parse_uuid(&self.paid_by)?,
            is_personal: self.is_personal,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

pub struct SplitRow {
    pub expense_id: String,
    pub user_id: String,
    pub amount_owed: String,
    pub amount_paid: String,
    pub is_settled: bool,
}

impl SplitRow {
    pub fn into_split(self) -> Result<ExpenseSplit> {
        Ok(ExpenseSplit {
            expense_id: parse_uuid(&self.expense_id)?,
            user_id: parse_uuid(&self.user_id)?,
            amount_owed: parse_decimal(&self.amount_owed)?,
            amount_paid: parse_decimal(&self.amount_paid)?,
            is_settled: self.is_settled,
        })
    }
}

/// Shared shape of `settlements` and `debt_payments` rows.
pub struct TransferRow {
    pub id: String,
    pub trip_id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub amount: String,
    pub at: String,
    pub status: Option<String>,
}

impl TransferRow {
    pub fn into_settlement(self) -> Result<SettlementRecord> {
        Ok(SettlementRecord {
            id: parse_uuid(&self.id)?,
            trip_id: parse_uuid(&self.trip_id)?,
            from_user_id: parse_uuid(&self.from_user_id)?,
            to_user_id: parse_uuid(&self.to_user_id)?,
            amount: parse_decimal(&self.amount)?,
            settled_at: parse_ts(&self.at)?,
        })
    }

    pub fn into_payment(self) -> Result<DebtPayment> {
        let status = self.status.as_deref().unwrap_or_default();
        Ok(DebtPayment {
            id: parse_uuid(&self.id)?,
            trip_id: parse_uuid(&self.trip_id)?,
            from_user_id: parse_uuid(&self.from_user_id)?,
            to_user_id: parse_uuid(&self.to_user_id)?,
            amount: parse_decimal(&self.amount)?,
            paid_at: parse_ts(&self.at)?,
            status: PaymentStatus::parse(status)
                .with_context(|| format!("Corrupt payment status '{}'", status))?,
        })
    }
}

pub fn parse_uuid(s: &str) -> Result<Uuid> {
    s.parse().with_context(|| format!("Corrupt id '{}'", s))
}

pub fn parse_decimal(s: &str) -> Result<Decimal> {
    s.parse().with_context(|| format!("Corrupt amount '{}'", s))
}

/// Timestamps are stored as fixed-width RFC 3339 (microseconds, `Z`) so that
/// lexical order in SQL matches chronological order.
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Rows written by SQLite's datetime('now') have no timezone
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .with_context(|| format!("Corrupt timestamp '{}'", s))
}
