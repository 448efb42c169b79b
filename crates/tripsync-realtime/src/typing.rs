use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use tripsync_types::events::TypingEvent;

/// A peer currently shown as typing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingUser {
    pub user_id: Uuid,
    pub display_name: Option<String>,
}

/// Ephemeral set of peers typing in one chat. An entry expires once no
/// `typing = true` has been seen from that peer for `timeout`.
#[derive(Debug)]
pub struct TypingTracker {
    timeout: Duration,
    users: HashMap<Uuid, (Option<String>, Instant)>,
}

impl TypingTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            users: HashMap::new(),
        }
    }

    pub fn observe(&mut self, event: &TypingEvent) {
        if event.is_typing {
            self.users.insert(
                event.sender_id,
                (event.display_name.clone(), Instant::now()),
            );
        } else {
            self.users.remove(&event.sender_id);
        }
    }

    /// Peers still typing, expired entries pruned. Sorted by user id so the
    /// result is stable.
    pub fn active(&mut self) -> Vec<TypingUser> {
        let now = Instant::now();
        let timeout = self.timeout;
        self.users
            .retain(|_, (_, seen)| now.duration_since(*seen) < timeout);

        let mut users: Vec<TypingUser> = self
            .users
            .iter()
            .map(|(id, (name, _))| TypingUser {
                user_id: *id,
                display_name: name.clone(),
            })
            .collect();
        users.sort_by_key(|u| u.user_id);
        users
    }

    pub fn clear(&mut self) {
        self.users.clear();
    }
}
