use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS profiles (
            id            TEXT PRIMARY KEY,
            display_name  TEXT NOT NULL,
            avatar_url    TEXT
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            trip_id     TEXT NOT NULL,
            sender_id   TEXT NOT NULL,
            message     TEXT NOT NULL,
            encrypted   INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL,
            edited_at   TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_trip
            ON messages(trip_id, created_at);

        CREATE TABLE IF NOT EXISTS message_attachments (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id   TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            file_url     TEXT NOT NULL,
            file_name    TEXT NOT NULL,
            file_type    TEXT NOT NULL,
            file_size    INTEGER NOT NULL,
            uploaded_by  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_attachments_message
            ON message_attachments(message_id);

        CREATE TABLE IF NOT EXISTS message_reactions (
            id          TEXT PRIMARY KEY,
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(message_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON message_reactions(message_id);

        CREATE TABLE IF NOT EXISTS message_reads (
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            read_at     TEXT NOT NULL,
            PRIMARY KEY (message_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS expenses (
            id           TEXT PRIMARY KEY,
            trip_id      TEXT NOT NULL,
            title        TEXT NOT NULL,
            amount       TEXT NOT NULL,
            category     TEXT NOT NULL,
            description  TEXT,
            paid_by      TEXT NOT NULL,
            is_personal  INTEGER NOT NULL DEFAULT 0,
            created_at   TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_expenses_trip
            ON expenses(trip_id, created_at);

        CREATE TABLE IF NOT EXISTS expense_splits (
            expense_id   TEXT NOT NULL REFERENCES expenses(id) ON DELETE CASCADE,
            user_id      TEXT NOT NULL,
            amount_owed  TEXT NOT NULL,
            amount_paid  TEXT NOT NULL,
            is_settled   INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (expense_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS budgets (
            trip_id       TEXT NOT NULL,
            user_id       TEXT NOT NULL,
            budget_limit  TEXT NOT NULL,
            PRIMARY KEY (trip_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS settlements (
            id            TEXT PRIMARY KEY,
            trip_id       TEXT NOT NULL,
            from_user_id  TEXT NOT NULL,
            to_user_id    TEXT NOT NULL,
            amount        TEXT NOT NULL,
            settled_at    TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_settlements_trip
            ON settlements(trip_id);

        CREATE TABLE IF NOT EXISTS debt_payments (
            id            TEXT PRIMARY KEY,
            trip_id       TEXT NOT NULL,
            from_user_id  TEXT NOT NULL,
            to_user_id    TEXT NOT NULL,
            amount        TEXT NOT NULL,
            paid_at       TEXT NOT NULL,
            status        TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_debt_payments_trip
            ON debt_payments(trip_id, from_user_id, to_user_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
