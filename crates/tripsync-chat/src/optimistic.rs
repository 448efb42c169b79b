use uuid::Uuid;

use tripsync_types::models::Message;

use crate::state::MessageList;

/// Pre-image of one message, taken before an optimistic local change.
///
/// Every mutating chat operation captures one, applies its change locally,
/// then calls the store; on failure the snapshot is rolled back so the list
/// is exactly as it was.
#[derive(Debug, Clone)]
#[must_use]
pub struct Snapshot {
    id: Uuid,
    before: Option<Message>,
}

impl Snapshot {
    pub fn capture(list: &MessageList, id: Uuid) -> Self {
        Self {
            id,
            before: list.get(id).cloned(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Undo whatever happened to the message since capture: restore it to
    /// its slot, or drop it if it did not exist then.
    pub fn rollback(self, list: &mut MessageList) {
        match self.before {
            Some(msg) => list.restore(msg),
            None => {
                list.remove(self.id);
            }
        }
    }

    /// The remote side accepted the change; nothing to undo.
    pub fn commit(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(text: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            trip_id: Uuid::nil(),
            sender_id: Uuid::new_v4(),
            sender: None,
            message: text.into(),
            encrypted: false,
            attachments: vec![],
            reactions: vec![],
            created_at: Utc::now(),
            edited_at: None,
            read_by: vec![],
        }
    }

    #[test]
    fn rollback_reverts_an_edit() {
        let original = message("before");
        let mut list = MessageList::new();
        list.insert_unique(original.clone());

        let snap = Snapshot::capture(&list, original.id);
        let msg = list.get_mut(original.id).unwrap();
        msg.message = "after".into();
        msg.edited_at = Some(Utc::now());

        snap.rollback(&mut list);
        assert_eq!(list.get(original.id), Some(&original));
    }

    #[test]
    fn rollback_of_unknown_message_removes_it() {
        let mut list = MessageList::new();
        let msg = message("new");
        let snap = Snapshot::capture(&list, msg.id);

        list.insert_unique(msg);
        snap.rollback(&mut list);
        assert!(list.is_empty());
    }
}
