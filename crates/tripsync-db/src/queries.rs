use std::collections::HashMap;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, types::ToSql};
use uuid::Uuid;

use tripsync_types::models::{Message, NewMessage, Profile, Reaction};

use crate::Database;
use crate::models::{AttachmentRow, MessageRow, ReactionRow, format_ts, parse_uuid};

impl Database {
    // -- Profiles --

    pub fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (id, display_name, avatar_url) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name,
                                               avatar_url = excluded.avatar_url",
                rusqlite::params![profile.id.to_string(), profile.display_name, profile.avatar_url],
            )?;
            Ok(())
        })
    }

    // -- Messages --

    /// Persist a new message with its attachments and return the stored
    /// record, sender profile joined.
    pub fn insert_message(&self, new: &NewMessage) -> Result<Message> {
        let id = Uuid::new_v4();
        let created_at = format_ts(&Utc::now());

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (id, trip_id, sender_id, message, encrypted, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    id.to_string(),
                    new.trip_id.to_string(),
                    new.sender_id.to_string(),
                    new.message,
                    new.encrypted,
                    created_at,
                ],
            )?;
            for a in &new.attachments {
                tx.execute(
                    "INSERT INTO message_attachments
                        (message_id, file_url, file_name, file_type, file_size, uploaded_by)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        id.to_string(),
                        a.file_url,
                        a.file_name,
                        a.file_type,
                        a.file_size,
                        a.uploaded_by.to_string(),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })?;

        self.get_message(id)?
            .ok_or_else(|| anyhow!("Message {} vanished after insert", id))
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let rows = query_message_rows(conn, "m.id = ?1", &id.to_string())?;
            Ok(hydrate_messages(conn, rows)?.into_iter().next())
        })
    }

    /// Full history for a trip in chronological order, with attachments,
    /// reactions and read receipts joined.
    pub fn get_messages(&self, trip_id: Uuid) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let rows = query_message_rows(conn, "m.trip_id = ?1", &trip_id.to_string())?;
            hydrate_messages(conn, rows)
        })
    }

    /// Update text only if `sender_id` authored the message. Returns false if
    /// no row matched.
    pub fn update_message_text(
        &self,
        id: Uuid,
        sender_id: Uuid,
        text: &str,
        encrypted: bool,
        edited_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE messages SET message = ?1, encrypted = ?2, edited_at = ?3
                 WHERE id = ?4 AND sender_id = ?5",
                rusqlite::params![
                    text,
                    encrypted,
                    format_ts(&edited_at),
                    id.to_string(),
                    sender_id.to_string(),
                ],
            )?;
            Ok(n == 1)
        })
    }

    /// Delete a message authored by `sender_id`; reactions, attachments and
    /// read receipts cascade.
    pub fn delete_message(&self, id: Uuid, sender_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM messages WHERE id = ?1 AND sender_id = ?2",
                rusqlite::params![id.to_string(), sender_id.to_string()],
            )?;
            Ok(n == 1)
        })
    }

    // -- Reactions --

    /// Set a user's reaction on a message, replacing any previous emoji.
    pub fn set_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> Result<Reaction> {
        let id = Uuid::new_v4();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM message_reactions WHERE message_id = ?1 AND user_id = ?2",
                rusqlite::params![message_id.to_string(), user_id.to_string()],
            )?;
            tx.execute(
                "INSERT INTO message_reactions (id, message_id, user_id, emoji, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    id.to_string(),
                    message_id.to_string(),
                    user_id.to_string(),
                    emoji,
                    format_ts(&Utc::now()),
                ],
            )?;
            tx.commit()?;
            Ok(())
        })?;

        self.with_conn(|conn| {
            let rows = query_reaction_rows(conn, &[message_id.to_string()])?;
            rows.into_iter()
                .find(|r| r.id == id.to_string())
                .ok_or_else(|| anyhow!("Reaction {} vanished after insert", id))?
                .into_reaction()
        })
    }

    pub fn delete_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM message_reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                rusqlite::params![message_id.to_string(), user_id.to_string(), emoji],
            )?;
            Ok(n > 0)
        })
    }

    // -- Read receipts --

    /// Returns false if the user had already read the message.
    pub fn mark_read(&self, message_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![message_id.to_string(), user_id.to_string(), format_ts(&Utc::now())],
            )?;
            Ok(n == 1)
        })
    }
}

fn query_message_rows(conn: &Connection, filter: &str, key: &str) -> Result<Vec<MessageRow>> {
    // JOIN profiles to fetch the sender snapshot in a single query
    let sql = format!(
        "SELECT m.id, m.trip_id, m.sender_id, p.display_name, p.avatar_url,
                m.message, m.encrypted, m.created_at, m.edited_at
         FROM messages m
         LEFT JOIN profiles p ON m.sender_id = p.id
         WHERE {}
         ORDER BY m.created_at ASC, m.id ASC",
        filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([key], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                trip_id: row.get(1)?,
                sender_id: row.get(2)?,
                sender_name: row.get(3)?,
                sender_avatar: row.get(4)?,
                message: row.get(5)?,
                encrypted: row.get(6)?,
                created_at: row.get(7)?,
                edited_at: row.get(8)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Attach attachments, reactions and read receipts with one batched query
/// each instead of one per message.
fn hydrate_messages(conn: &Connection, rows: Vec<MessageRow>) -> Result<Vec<Message>> {
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();

    let mut attachments: HashMap<String, Vec<AttachmentRow>> = HashMap::new();
    for a in query_attachment_rows(conn, &ids)? {
        attachments.entry(a.message_id.clone()).or_default().push(a);
    }
    let mut reactions: HashMap<String, Vec<ReactionRow>> = HashMap::new();
    for r in query_reaction_rows(conn, &ids)? {
        reactions.entry(r.message_id.clone()).or_default().push(r);
    }
    let mut reads: HashMap<String, Vec<String>> = HashMap::new();
    for (message_id, user_id) in query_read_rows(conn, &ids)? {
        reads.entry(message_id).or_default().push(user_id);
    }

    rows.into_iter()
        .map(|row| {
            let key = row.id.clone();
            let mut msg = row.into_message()?;
            msg.attachments = attachments
                .remove(&key)
                .unwrap_or_default()
                .into_iter()
                .map(AttachmentRow::into_attachment)
                .collect::<Result<_>>()?;
            msg.reactions = reactions
                .remove(&key)
                .unwrap_or_default()
                .into_iter()
                .map(ReactionRow::into_reaction)
                .collect::<Result<_>>()?;
            msg.read_by = reads
                .remove(&key)
                .unwrap_or_default()
                .iter()
                .map(|s| parse_uuid(s))
                .collect::<Result<_>>()?;
            Ok(msg)
        })
        .collect()
}

fn query_attachment_rows(conn: &Connection, message_ids: &[String]) -> Result<Vec<AttachmentRow>> {
    if message_ids.is_empty() {
        return Ok(vec![]);
    }
    let sql = format!(
        "SELECT message_id, file_url, file_name, file_type, file_size, uploaded_by
         FROM message_attachments WHERE message_id IN ({}) ORDER BY id ASC",
        placeholders(message_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(as_params(message_ids).as_slice(), |row| {
            Ok(AttachmentRow {
                message_id: row.get(0)?,
                file_url: row.get(1)?,
                file_name: row.get(2)?,
                file_type: row.get(3)?,
                file_size: row.get(4)?,
                uploaded_by: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn query_reaction_rows(conn: &Connection, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
    if message_ids.is_empty() {
        return Ok(vec![]);
    }
    let sql = format!(
        "SELECT r.id, r.message_id, r.user_id, r.emoji, p.display_name, p.avatar_url
         FROM message_reactions r
         LEFT JOIN profiles p ON r.user_id = p.id
         WHERE r.message_id IN ({})
         ORDER BY r.created_at ASC",
        placeholders(message_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(as_params(message_ids).as_slice(), |row| {
            Ok(ReactionRow {
                id: row.get(0)?,
                message_id: row.get(1)?,
                user_id: row.get(2)?,
                emoji: row.get(3)?,
                user_name: row.get(4)?,
                user_avatar: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn query_read_rows(conn: &Connection, message_ids: &[String]) -> Result<Vec<(String, String)>> {
    if message_ids.is_empty() {
        return Ok(vec![]);
    }
    let sql = format!(
        "SELECT message_id, user_id FROM message_reads WHERE message_id IN ({}) ORDER BY read_at ASC",
        placeholders(message_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(as_params(message_ids).as_slice(), |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
}

pub(crate) fn as_params(values: &[String]) -> Vec<&dyn ToSql> {
    values.iter().map(|v| v as &dyn ToSql).collect()
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tripsync_types::models::Attachment;

    fn setup() -> (Database, Uuid, Profile) {
        let db = Database::open_in_memory().unwrap();
        let alice = Profile {
            id: Uuid::new_v4(),
            display_name: "Alice".into(),
            avatar_url: Some("avatars/alice.png".into()),
        };
        db.upsert_profile(&alice).unwrap();
        (db, Uuid::new_v4(), alice)
    }

    fn new_message(trip_id: Uuid, sender_id: Uuid, text: &str) -> NewMessage {
        NewMessage {
            trip_id,
            sender_id,
            message: text.into(),
            encrypted: false,
            attachments: vec![],
        }
    }

    #[test]
    fn insert_joins_sender_and_attachments() {
        let (db, trip, alice) = setup();
        let mut new = new_message(trip, alice.id, "tickets attached");
        new.attachments.push(Attachment {
            file_url: "files/t.pdf".into(),
            file_name: "t.pdf".into(),
            file_type: "application/pdf".into(),
            file_size: 2048,
            uploaded_by: alice.id,
        });

        let msg = db.insert_message(&new).unwrap();
        assert_eq!(msg.sender, Some(alice.clone()));
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].file_name, "t.pdf");

        let history = db.get_messages(trip).unwrap();
        assert_eq!(history, vec![msg]);
    }

    #[test]
    fn history_is_chronological_and_trip_scoped() {
        let (db, trip, alice) = setup();
        let first = db.insert_message(&new_message(trip, alice.id, "one")).unwrap();
        let second = db.insert_message(&new_message(trip, alice.id, "two")).unwrap();
        db.insert_message(&new_message(Uuid::new_v4(), alice.id, "elsewhere")).unwrap();

        let ids: Vec<Uuid> = db.get_messages(trip).unwrap().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn only_sender_may_edit_or_delete() {
        let (db, trip, alice) = setup();
        let msg = db.insert_message(&new_message(trip, alice.id, "draft")).unwrap();
        let mallory = Uuid::new_v4();

        assert!(!db.update_message_text(msg.id, mallory, "pwned", false, Utc::now()).unwrap());
        assert!(db.update_message_text(msg.id, alice.id, "final", false, Utc::now()).unwrap());
        assert!(!db.delete_message(msg.id, mallory).unwrap());

        let stored = db.get_message(msg.id).unwrap().unwrap();
        assert_eq!(stored.message, "final");
        assert!(stored.edited_at.is_some());

        assert!(db.delete_message(msg.id, alice.id).unwrap());
        assert!(db.get_message(msg.id).unwrap().is_none());
    }

    #[test]
    fn reaction_replaces_per_user_and_cascades() {
        let (db, trip, alice) = setup();
        let msg = db.insert_message(&new_message(trip, alice.id, "sunset!")).unwrap();

        db.set_reaction(msg.id, alice.id, "👍").unwrap();
        let latest = db.set_reaction(msg.id, alice.id, "😍").unwrap();
        assert_eq!(latest.user.as_ref().map(|p| p.display_name.as_str()), Some("Alice"));

        let stored = db.get_message(msg.id).unwrap().unwrap();
        assert_eq!(stored.reactions, vec![latest]);

        assert!(!db.delete_reaction(msg.id, alice.id, "👍").unwrap());
        assert!(db.delete_reaction(msg.id, alice.id, "😍").unwrap());

        db.set_reaction(msg.id, alice.id, "🔥").unwrap();
        db.delete_message(msg.id, alice.id).unwrap();
        let orphans: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM message_reactions", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn mark_read_is_idempotent() {
        let (db, trip, alice) = setup();
        let msg = db.insert_message(&new_message(trip, alice.id, "read me")).unwrap();
        let bob = Uuid::new_v4();

        assert!(db.mark_read(msg.id, bob).unwrap());
        assert!(!db.mark_read(msg.id, bob).unwrap());
        assert_eq!(db.get_message(msg.id).unwrap().unwrap().read_by, vec![bob]);
    }
}
