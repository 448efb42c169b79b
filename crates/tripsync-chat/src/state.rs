use chrono::{DateTime, Utc};
use uuid::Uuid;

use tripsync_types::models::Message;

/// Messages keyed by id and kept in `created_at` order, whatever order they
/// arrived in.
#[derive(Debug, Clone, Default)]
pub struct MessageList {
    items: Vec<Message>,
}

impl MessageList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything with a fresh fetch. Duplicate ids keep the first
    /// occurrence.
    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.items.clear();
        for msg in messages {
            self.insert_unique(msg);
        }
    }

    /// Take a store fetch that began at `since` as the new list. Entries it
    /// does not contain survive only if created at or after `since`, since
    /// those arrived while the fetch was in flight.
    pub fn merge_fetched(&mut self, fetched: Vec<Message>, since: DateTime<Utc>) {
        let newer: Vec<Message> = self
            .items
            .drain(..)
            .filter(|m| m.created_at >= since)
            .collect();
        self.replace_all(fetched);
        for msg in newer {
            self.insert_unique(msg);
        }
    }

    /// Insert unless a message with the same id is already present. Returns
    /// whether it was inserted.
    pub fn insert_unique(&mut self, msg: Message) -> bool {
        if self.contains(msg.id) {
            return false;
        }
        let at = self.position_for(&msg);
        self.items.insert(at, msg);
        true
    }

    /// Put `msg` back in its chronological slot, replacing any entry with
    /// the same id.
    pub fn restore(&mut self, msg: Message) {
        self.remove(msg.id);
        let at = self.position_for(&msg);
        self.items.insert(at, msg);
    }

    pub fn remove(&mut self, id: Uuid) -> Option<Message> {
        let idx = self.items.iter().position(|m| m.id == id)?;
        Some(self.items.remove(idx))
    }

    pub fn get(&self, id: Uuid) -> Option<&Message> {
        self.items.iter().find(|m| m.id == id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Message> {
        self.items.iter_mut().find(|m| m.id == id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.items.iter()
    }

    pub fn to_vec(&self) -> Vec<Message> {
        self.items.clone()
    }

    // Equal timestamps keep arrival order
    fn position_for(&self, msg: &Message) -> usize {
        self.items
            .partition_point(|m| m.created_at <= msg.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn message_at(at: DateTime<Utc>) -> Message {
        Message {
            id: Uuid::new_v4(),
            trip_id: Uuid::nil(),
            sender_id: Uuid::new_v4(),
            sender: None,
            message: "hi".into(),
            encrypted: false,
            attachments: vec![],
            reactions: vec![],
            created_at: at,
            edited_at: None,
            read_by: vec![],
        }
    }

    #[test]
    fn out_of_order_arrivals_are_sorted() {
        let now = Utc::now();
        let (a, b, c) = (
            message_at(now),
            message_at(now + Duration::seconds(1)),
            message_at(now + Duration::seconds(2)),
        );
        let mut list = MessageList::new();
        list.insert_unique(c.clone());
        list.insert_unique(a.clone());
        list.insert_unique(b.clone());

        let ids: Vec<Uuid> = list.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
    }

    #[test]
    fn duplicate_ids_are_suppressed() {
        let msg = message_at(Utc::now());
        let mut list = MessageList::new();
        assert!(list.insert_unique(msg.clone()));
        assert!(!list.insert_unique(msg));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn restore_returns_to_chronological_slot() {
        let now = Utc::now();
        let msgs: Vec<Message> = (0..3)
            .map(|i| message_at(now + Duration::seconds(i)))
            .collect();
        let mut list = MessageList::new();
        list.replace_all(msgs.clone());

        let middle = list.remove(msgs[1].id).unwrap();
        assert_eq!(list.len(), 2);
        list.restore(middle);
        assert_eq!(list.to_vec(), msgs);
    }

    #[test]
    fn merge_keeps_arrivals_newer_than_the_fetch() {
        let now = Utc::now();
        let stale = message_at(now - Duration::seconds(10));
        let stored = message_at(now - Duration::seconds(5));
        let live = message_at(now + Duration::seconds(1));

        let mut list = MessageList::new();
        list.insert_unique(stale.clone());
        list.insert_unique(live.clone());

        list.merge_fetched(vec![stored.clone()], now);
        let ids: Vec<Uuid> = list.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![stored.id, live.id]);
    }
}
