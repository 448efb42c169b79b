use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use tripsync_db::Database;
use tripsync_types::models::{Message, NewMessage, Profile, Reaction};

/// The persistence calls a chat session makes. Calls are blocking; the
/// session runs them on the blocking pool.
pub trait ChatStore: Send + Sync + 'static {
    fn upsert_profile(&self, profile: &Profile) -> Result<()>;
    fn insert_message(&self, new: &NewMessage) -> Result<Message>;
    /// All messages of a trip, oldest first, with attachments, reactions and
    /// read receipts hydrated.
    fn get_messages(&self, trip_id: Uuid) -> Result<Vec<Message>>;
    /// Returns false when no message by `sender_id` matched.
    fn update_message_text(
        &self,
        id: Uuid,
        sender_id: Uuid,
        text: &str,
        encrypted: bool,
        edited_at: DateTime<Utc>,
    ) -> Result<bool>;
    fn delete_message(&self, id: Uuid, sender_id: Uuid) -> Result<bool>;
    fn set_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> Result<Reaction>;
    fn delete_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> Result<bool>;
    fn mark_read(&self, message_id: Uuid, user_id: Uuid) -> Result<bool>;
}

impl ChatStore for Database {
    fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        Database::upsert_profile(self, profile)
    }

    fn insert_message(&self, new: &NewMessage) -> Result<Message> {
        Database::insert_message(self, new)
    }

    fn get_messages(&self, trip_id: Uuid) -> Result<Vec<Message>> {
        Database::get_messages(self, trip_id)
    }

    fn update_message_text(
        &self,
        id: Uuid,
        sender_id: Uuid,
        text: &str,
        encrypted: bool,
        edited_at: DateTime<Utc>,
    ) -> Result<bool> {
        Database::update_message_text(self, id, sender_id, text, encrypted, edited_at)
    }

    fn delete_message(&self, id: Uuid, sender_id: Uuid) -> Result<bool> {
        Database::delete_message(self, id, sender_id)
    }

    fn set_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> Result<Reaction> {
        Database::set_reaction(self, message_id, user_id, emoji)
    }

    fn delete_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> Result<bool> {
        Database::delete_reaction(self, message_id, user_id, emoji)
    }

    fn mark_read(&self, message_id: Uuid, user_id: Uuid) -> Result<bool> {
        Database::mark_read(self, message_id, user_id)
    }
}
