use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Display snapshot of a user, denormalized onto messages and reactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_url: String,
    pub file_name: String,
    /// MIME type
    pub file_type: String,
    pub file_size: i64,
    pub uploaded_by: Uuid,
}

/// One user's reaction to a message. A user holds at most one reaction per
/// message; reacting again replaces the previous emoji.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub id: Uuid,
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
    #[serde(default)]
    pub user: Option<Profile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub sender_id: Uuid,
    #[serde(default)]
    pub sender: Option<Profile>,
    pub message: String,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read_by: Vec<Uuid>,
}

impl Message {
    pub fn reaction_by(&self, user_id: Uuid) -> Option<&Reaction> {
        self.reactions.iter().find(|r| r.user_id == user_id)
    }

    /// Insert `reaction`, replacing any earlier reaction by the same user.
    pub fn set_reaction(&mut self, reaction: Reaction) {
        self.reactions.retain(|r| r.user_id != reaction.user_id);
        self.reactions.push(reaction);
    }

    /// Remove `user_id`'s reaction if it carries `emoji`. Returns whether
    /// anything was removed.
    pub fn remove_reaction(&mut self, user_id: Uuid, emoji: &str) -> bool {
        let before = self.reactions.len();
        self.reactions
            .retain(|r| !(r.user_id == user_id && r.emoji == emoji));
        self.reactions.len() != before
    }

    /// Append `user_id` to `read_by`. Returns false if it was already there.
    pub fn mark_read(&mut self, user_id: Uuid) -> bool {
        if self.read_by.contains(&user_id) {
            return false;
        }
        self.read_by.push(user_id);
        true
    }
}

/// Everything needed to persist a new message; the store assigns id and
/// `created_at`.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub trip_id: Uuid,
    pub sender_id: Uuid,
    pub message: String,
    pub encrypted: bool,
    pub attachments: Vec<Attachment>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> Message {
        Message {
            id: Uuid::new_v4(),
            trip_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            sender: None,
            message: "hello".into(),
            encrypted: false,
            attachments: vec![],
            reactions: vec![],
            created_at: Utc::now(),
            edited_at: None,
            read_by: vec![],
        }
    }

    fn reaction(message_id: Uuid, user_id: Uuid, emoji: &str) -> Reaction {
        Reaction {
            id: Uuid::new_v4(),
            message_id,
            user_id,
            emoji: emoji.into(),
            user: None,
        }
    }

    #[test]
    fn set_reaction_replaces_previous_emoji() {
        let mut msg = message();
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();

        msg.set_reaction(reaction(msg.id, user, "👍"));
        msg.set_reaction(reaction(msg.id, other, "🎉"));
        msg.set_reaction(reaction(msg.id, user, "❤️"));

        assert_eq!(msg.reactions.len(), 2);
        assert_eq!(msg.reaction_by(user).unwrap().emoji, "❤️");
        assert_eq!(msg.reaction_by(other).unwrap().emoji, "🎉");
    }

    #[test]
    fn remove_reaction_requires_matching_emoji() {
        let mut msg = message();
        let user = Uuid::new_v4();
        msg.set_reaction(reaction(msg.id, user, "👍"));

        assert!(!msg.remove_reaction(user, "❤️"));
        assert!(msg.remove_reaction(user, "👍"));
        assert!(msg.reactions.is_empty());
    }

    #[test]
    fn mark_read_is_idempotent() {
        let mut msg = message();
        let user = Uuid::new_v4();
        assert!(msg.mark_read(user));
        assert!(!msg.mark_read(user));
        assert_eq!(msg.read_by, vec![user]);
    }
}
