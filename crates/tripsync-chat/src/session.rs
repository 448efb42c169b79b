use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tripsync_crypto::{MessageCipher, TripKey};
use tripsync_realtime::typing::TypingUser;
use tripsync_realtime::{
    CONNECTION_EVENT, ChannelTransport, ConnectionManager, ConnectionStatus, HandlerId,
    RealtimeConfig,
};
use tripsync_types::auth::{Authenticator, CurrentUser};
use tripsync_types::events::{
    ChatEvent, InboundEvent, MessageDelete, MessageEdit, MessagePayload, ReactionAction,
    ReactionEvent, TypingEvent,
};
use tripsync_types::models::{Attachment, Message, NewMessage, Reaction};
use tripsync_types::{Result, TripError};

use crate::optimistic::Snapshot;
use crate::state::MessageList;
use crate::store::ChatStore;

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub realtime: RealtimeConfig,
    /// When set, message text is sealed before it is stored or broadcast.
    pub key: Option<TripKey>,
}

/// One client's view of a trip chat.
///
/// Writes go to the store first, are applied locally, then broadcast so peers
/// see them without polling. Inbound broadcasts are normalized and merged:
/// messages are de-duplicated by id, and reaction/edit/delete events that we
/// sent ourselves are ignored since they were already applied.
///
/// Clones share the session. Call [`close`](Self::close) to tear it down.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    trip_id: Uuid,
    user: CurrentUser,
    store: Arc<dyn ChatStore>,
    connection: ConnectionManager,
    cipher: Option<MessageCipher>,
    messages: Mutex<MessageList>,
    handlers: Mutex<Vec<HandlerId>>,
    closed: AtomicBool,
}

impl ChatSession {
    /// Resolve the user, open the trip channel and load history.
    ///
    /// Does not wait for the channel to reach `connected`.
    pub async fn open(
        trip_id: Uuid,
        auth: &dyn Authenticator,
        store: Arc<dyn ChatStore>,
        transport: Arc<dyn ChannelTransport>,
        options: SessionOptions,
    ) -> Result<Self> {
        let user = auth
            .current_user()
            .ok_or_else(|| TripError::Authentication("no signed-in user".into()))?;

        let session = Self {
            inner: Arc::new(SessionInner {
                trip_id,
                user: user.clone(),
                store,
                connection: ConnectionManager::new(transport, options.realtime),
                cipher: options.key.as_ref().map(MessageCipher::new),
                messages: Mutex::new(MessageList::new()),
                handlers: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        };

        let profile = user.profile();
        session
            .persist(move |store| store.upsert_profile(&profile))
            .await?;

        session.register_handlers();
        session.inner.connection.initialize(trip_id, auth)?;
        session.refresh_history().await?;

        info!("Chat session open for trip {} as {}", trip_id, user.display_name);
        Ok(session)
    }

    pub fn trip_id(&self) -> Uuid {
        self.inner.trip_id
    }

    pub fn user(&self) -> &CurrentUser {
        &self.inner.user
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.connection.status()
    }

    /// The visible list, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        self.inner.lock_messages().to_vec()
    }

    pub fn message(&self, id: Uuid) -> Option<Message> {
        self.inner.lock_messages().get(id).cloned()
    }

    pub fn typing_users(&self) -> Vec<TypingUser> {
        self.inner.connection.typing_users()
    }

    /// Reload the whole list from the store. Anything missed while
    /// disconnected shows up here; the result is the same however many times
    /// it runs. Messages delivered while the fetch is in flight are kept.
    pub async fn refresh_history(&self) -> Result<usize> {
        let trip_id = self.inner.trip_id;
        let since = Utc::now();
        let fetched = self
            .persist(move |store| store.get_messages(trip_id))
            .await?;

        let messages: Vec<Message> = fetched
            .into_iter()
            .filter_map(|m| self.inner.reveal(m))
            .collect();
        let count = messages.len();
        self.inner.lock_messages().merge_fetched(messages, since);
        debug!("Loaded {} messages for trip {}", count, trip_id);
        Ok(count)
    }

    /// Send a text message. Blank text is ignored and yields `None`.
    pub async fn send_message(&self, text: &str) -> Result<Option<Message>> {
        self.send_message_with_attachments(text, Vec::new()).await
    }

    /// Send a message carrying already-uploaded attachments. Text may be
    /// blank when at least one attachment is present.
    pub async fn send_message_with_attachments(
        &self,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> Result<Option<Message>> {
        let text = text.trim();
        if text.is_empty() && attachments.is_empty() {
            return Ok(None);
        }

        let (stored_text, encrypted) = self.inner.conceal(text)?;
        let new = NewMessage {
            trip_id: self.inner.trip_id,
            sender_id: self.inner.user.id,
            message: stored_text,
            encrypted,
            attachments,
        };
        let stored = self.persist(move |store| store.insert_message(&new)).await?;

        let mut local = stored.clone();
        local.message = text.to_string();
        self.inner.lock_messages().insert_unique(local.clone());

        let payload = MessagePayload {
            message: &stored,
            timestamp: Utc::now(),
        };
        self.inner.broadcast(ChatEvent::Message, &payload);
        Ok(Some(local))
    }

    /// Change the text of one of our own messages. The local list shows the
    /// new text at once and reverts if the store rejects the update.
    pub async fn edit_message(&self, id: Uuid, new_text: &str) -> Result<()> {
        let new_text = new_text.trim();
        if new_text.is_empty() {
            return Err(TripError::validation("message text cannot be empty"));
        }
        let me = self.inner.user.id;
        let edited_at = Utc::now();

        let snapshot = {
            let mut list = self.inner.lock_messages();
            let snapshot = Snapshot::capture(&list, id);
            let msg = list
                .get_mut(id)
                .ok_or_else(|| TripError::NotFound(format!("message {id}")))?;
            if msg.sender_id != me {
                return Err(TripError::Forbidden("only the sender can edit a message".into()));
            }
            msg.message = new_text.to_string();
            msg.edited_at = Some(edited_at);
            snapshot
        };

        let (stored_text, encrypted) = match self.inner.conceal(new_text) {
            Ok(sealed) => sealed,
            Err(e) => {
                self.inner.rollback(snapshot);
                return Err(e);
            }
        };
        let text = stored_text.clone();
        let result = self
            .persist(move |store| store.update_message_text(id, me, &text, encrypted, edited_at))
            .await;
        self.settle(snapshot, result, "edit")?;

        self.inner.broadcast(
            ChatEvent::MessageEdit,
            &MessageEdit {
                id,
                sender_id: me,
                message: stored_text,
                encrypted,
                edited_at,
            },
        );
        Ok(())
    }

    /// Delete one of our own messages once `confirm` agrees. Returns false
    /// if the confirmation declined. On a store failure the message goes back
    /// to its chronological slot.
    pub async fn delete_message<F>(&self, id: Uuid, confirm: F) -> Result<bool>
    where
        F: FnOnce(&Message) -> bool,
    {
        let me = self.inner.user.id;
        let target = self
            .message(id)
            .ok_or_else(|| TripError::NotFound(format!("message {id}")))?;
        if target.sender_id != me {
            return Err(TripError::Forbidden("only the sender can delete a message".into()));
        }
        if !confirm(&target) {
            return Ok(false);
        }

        let snapshot = {
            let mut list = self.inner.lock_messages();
            let snapshot = Snapshot::capture(&list, id);
            list.remove(id);
            snapshot
        };

        let result = self
            .persist(move |store| store.delete_message(id, me))
            .await;
        self.settle(snapshot, result, "delete")?;

        self.inner.broadcast(
            ChatEvent::MessageDelete,
            &MessageDelete {
                id,
                sender_id: me,
                timestamp: Utc::now(),
            },
        );
        Ok(true)
    }

    /// React to a message. Any earlier reaction of ours on it is replaced.
    pub async fn add_reaction(&self, message_id: Uuid, emoji: &str) -> Result<()> {
        let me = self.inner.user.clone();
        let snapshot = {
            let mut list = self.inner.lock_messages();
            let snapshot = Snapshot::capture(&list, message_id);
            let msg = list
                .get_mut(message_id)
                .ok_or_else(|| TripError::NotFound(format!("message {message_id}")))?;
            msg.set_reaction(Reaction {
                id: Uuid::new_v4(),
                message_id,
                user_id: me.id,
                emoji: emoji.to_string(),
                user: Some(me.profile()),
            });
            snapshot
        };

        let owned_emoji = emoji.to_string();
        let result = self
            .persist(move |store| store.set_reaction(message_id, me.id, &owned_emoji))
            .await;
        let stored = match result {
            Ok(reaction) => {
                snapshot.commit();
                reaction
            }
            Err(e) => {
                self.inner.rollback(snapshot);
                error!("Reaction on {} failed: {}", message_id, e);
                return Err(e);
            }
        };

        // Swap the placeholder for the stored row
        if let Some(msg) = self.inner.lock_messages().get_mut(message_id) {
            msg.set_reaction(stored.clone());
        }

        self.inner.broadcast(
            ChatEvent::Reaction,
            &ReactionEvent {
                action: ReactionAction::Add,
                message_id,
                sender_id: self.inner.user.id,
                emoji: emoji.to_string(),
                reaction: Some(stored),
                timestamp: Utc::now(),
            },
        );
        Ok(())
    }

    /// Withdraw our reaction if it carries `emoji`; otherwise a no-op.
    pub async fn remove_reaction(&self, message_id: Uuid, emoji: &str) -> Result<()> {
        let me = self.inner.user.id;
        let snapshot = {
            let mut list = self.inner.lock_messages();
            let snapshot = Snapshot::capture(&list, message_id);
            let msg = list
                .get_mut(message_id)
                .ok_or_else(|| TripError::NotFound(format!("message {message_id}")))?;
            if !msg.remove_reaction(me, emoji) {
                snapshot.commit();
                return Ok(());
            }
            snapshot
        };

        let owned_emoji = emoji.to_string();
        let result = self
            .persist(move |store| store.delete_reaction(message_id, me, &owned_emoji))
            .await;
        if let Err(e) = result {
            self.inner.rollback(snapshot);
            error!("Removing reaction on {} failed: {}", message_id, e);
            return Err(e);
        }
        snapshot.commit();

        self.inner.broadcast(
            ChatEvent::Reaction,
            &ReactionEvent {
                action: ReactionAction::Remove,
                message_id,
                sender_id: me,
                emoji: emoji.to_string(),
                reaction: None,
                timestamp: Utc::now(),
            },
        );
        Ok(())
    }

    /// Broadcast-only; nothing is stored.
    pub fn send_typing_indicator(&self, is_typing: bool) -> Result<()> {
        let event = TypingEvent {
            sender_id: self.inner.user.id,
            display_name: Some(self.inner.user.display_name.clone()),
            is_typing,
            timestamp: Utc::now(),
        };
        let payload =
            serde_json::to_value(&event).map_err(|e| TripError::Channel(e.to_string()))?;
        self.inner.connection.send(ChatEvent::Typing, payload)
    }

    /// Record that `user_id` has read a message. Returns false when it was
    /// already recorded, in which case the store is not touched.
    pub async fn mark_as_read(&self, message_id: Uuid, user_id: Uuid) -> Result<bool> {
        let snapshot = {
            let mut list = self.inner.lock_messages();
            let snapshot = Snapshot::capture(&list, message_id);
            let msg = list
                .get_mut(message_id)
                .ok_or_else(|| TripError::NotFound(format!("message {message_id}")))?;
            if !msg.mark_read(user_id) {
                snapshot.commit();
                return Ok(false);
            }
            snapshot
        };

        let result = self
            .persist(move |store| store.mark_read(message_id, user_id))
            .await;
        if let Err(e) = result {
            self.inner.rollback(snapshot);
            return Err(e);
        }
        snapshot.commit();
        Ok(true)
    }

    /// Deregister handlers and close the channel. Store calls already in
    /// flight complete; their results are discarded.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.teardown();
        info!("Chat session closed for trip {}", self.inner.trip_id);
    }

    fn register_handlers(&self) {
        let mut ids = Vec::with_capacity(5);

        for event in [
            ChatEvent::Message,
            ChatEvent::Reaction,
            ChatEvent::MessageEdit,
            ChatEvent::MessageDelete,
        ] {
            let weak = Arc::downgrade(&self.inner);
            ids.push(self.inner.connection.on_event(event.as_str(), move |payload| {
                if let Some(inner) = weak.upgrade() {
                    inner.apply_inbound(event, payload);
                }
            }));
        }

        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        ids.push(self.inner.connection.on_event(CONNECTION_EVENT, move |payload| {
            if payload["status"].as_str() != Some("connected") {
                return;
            }
            let Some(inner) = weak.upgrade() else { return };
            // Covers the first connect too: it may land long after `open`
            // fetched, once backoff gets through
            let session = ChatSession { inner };
            tokio::spawn(async move {
                if let Err(e) = session.refresh_history().await {
                    warn!("History refresh on connect failed: {}", e);
                }
            });
        }));

        *self.inner.lock_handlers() = ids;
    }

    /// Run a store call on the blocking pool, mapping failures to
    /// [`TripError::Persistence`].
    async fn persist<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&dyn ChatStore) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.inner.store.clone();
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                TripError::persistence(e)
            })?
            .map_err(TripError::persistence)
    }

    /// Commit on success, roll back on failure or when the store matched no
    /// row (the sender filter rejected us).
    fn settle(&self, snapshot: Snapshot, result: Result<bool>, op: &str) -> Result<()> {
        match result {
            Ok(true) => {
                snapshot.commit();
                Ok(())
            }
            Ok(false) => {
                self.inner.rollback(snapshot);
                Err(TripError::Forbidden(format!("{op} rejected by store")))
            }
            Err(e) => {
                self.inner.rollback(snapshot);
                error!("Message {} failed: {}", op, e);
                Err(e)
            }
        }
    }
}

impl SessionInner {
    fn lock_messages(&self) -> MutexGuard<'_, MessageList> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_handlers(&self) -> MutexGuard<'_, Vec<HandlerId>> {
        self.handlers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn rollback(&self, snapshot: Snapshot) {
        warn!("Rolling back local change to message {}", snapshot.id());
        snapshot.rollback(&mut self.lock_messages());
    }

    fn teardown(&self) {
        for id in self.lock_handlers().drain(..) {
            self.connection.off_event(id);
        }
        self.connection.disconnect();
    }

    /// Text as it should be stored: sealed when the trip has a key.
    fn conceal(&self, text: &str) -> Result<(String, bool)> {
        match &self.cipher {
            Some(cipher) => cipher
                .seal(text)
                .map(|sealed| (sealed, true))
                .map_err(|e| TripError::Crypto(e.to_string())),
            None => Ok((text.to_string(), false)),
        }
    }

    /// Decrypt a stored or broadcast record for display. `None` means it
    /// cannot be shown.
    fn reveal(&self, mut msg: Message) -> Option<Message> {
        if !msg.encrypted {
            return Some(msg);
        }
        let Some(cipher) = &self.cipher else {
            warn!("Dropping encrypted message {}: no trip key", msg.id);
            return None;
        };
        match cipher.open(&msg.message) {
            Ok(plain) => {
                msg.message = plain;
                Some(msg)
            }
            Err(e) => {
                warn!("Dropping message {}: {}", msg.id, e);
                None
            }
        }
    }

    fn broadcast<T: Serialize>(&self, event: ChatEvent, payload: &T) {
        let value = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                error!("Failed to encode {} payload: {}", event.as_str(), e);
                return;
            }
        };
        if let Err(e) = self.connection.send(event, value) {
            warn!(
                "{} persisted but not broadcasted: {}",
                event.as_str(),
                e
            );
        }
    }

    fn apply_inbound(&self, event: ChatEvent, payload: &Value) {
        let Some(inbound) = InboundEvent::parse(event, payload) else {
            return;
        };

        match inbound {
            InboundEvent::Message(msg) => {
                if msg.trip_id != self.trip_id {
                    debug!("Ignoring message {} for another trip", msg.id);
                    return;
                }
                let Some(msg) = self.reveal(msg) else { return };
                let id = msg.id;
                if !self.lock_messages().insert_unique(msg) {
                    debug!("Suppressed duplicate message {}", id);
                }
            }
            other if other.sender_id() == self.user.id => {
                // Applied optimistically when we sent it
            }
            InboundEvent::Reaction(ev) => {
                let mut list = self.lock_messages();
                let Some(msg) = list.get_mut(ev.message_id) else { return };
                match ev.action {
                    ReactionAction::Add => {
                        let reaction = ev.reaction.unwrap_or_else(|| Reaction {
                            id: Uuid::new_v4(),
                            message_id: ev.message_id,
                            user_id: ev.sender_id,
                            emoji: ev.emoji.clone(),
                            user: None,
                        });
                        msg.set_reaction(reaction);
                    }
                    ReactionAction::Remove => {
                        msg.remove_reaction(ev.sender_id, &ev.emoji);
                    }
                }
            }
            InboundEvent::Edit(edit) => {
                let text = if edit.encrypted {
                    let Some(cipher) = &self.cipher else {
                        warn!("Ignoring encrypted edit of {}: no trip key", edit.id);
                        return;
                    };
                    match cipher.open(&edit.message) {
                        Ok(plain) => plain,
                        Err(e) => {
                            warn!("Ignoring edit of {}: {}", edit.id, e);
                            return;
                        }
                    }
                } else {
                    edit.message
                };
                let mut list = self.lock_messages();
                if let Some(msg) = list.get_mut(edit.id) {
                    if msg.sender_id == edit.sender_id {
                        msg.message = text;
                        msg.edited_at = Some(edit.edited_at);
                    }
                }
            }
            InboundEvent::Delete(del) => {
                let mut list = self.lock_messages();
                if list.get(del.id).is_some_and(|m| m.sender_id == del.sender_id) {
                    list.remove(del.id);
                }
            }
            InboundEvent::Typing(_) => {}
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            self.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    use chrono::DateTime;
    use tripsync_db::Database;
    use tripsync_realtime::{Hub, LocalTransport};
    use tripsync_types::auth::StaticAuth;
    use tripsync_types::models::Profile;

    /// Delegates to a real database until told to fail writes.
    struct FlakyStore {
        db: Database,
        fail_writes: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> anyhow::Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                anyhow::bail!("store unreachable");
            }
            Ok(())
        }
    }

    impl ChatStore for FlakyStore {
        fn upsert_profile(&self, profile: &Profile) -> anyhow::Result<()> {
            self.db.upsert_profile(profile)
        }
        fn insert_message(&self, new: &NewMessage) -> anyhow::Result<Message> {
            self.check()?;
            self.db.insert_message(new)
        }
        fn get_messages(&self, trip_id: Uuid) -> anyhow::Result<Vec<Message>> {
            self.db.get_messages(trip_id)
        }
        fn update_message_text(
            &self,
            id: Uuid,
            sender_id: Uuid,
            text: &str,
            encrypted: bool,
            edited_at: DateTime<Utc>,
        ) -> anyhow::Result<bool> {
            self.check()?;
            self.db.update_message_text(id, sender_id, text, encrypted, edited_at)
        }
        fn delete_message(&self, id: Uuid, sender_id: Uuid) -> anyhow::Result<bool> {
            self.check()?;
            self.db.delete_message(id, sender_id)
        }
        fn set_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> anyhow::Result<Reaction> {
            self.check()?;
            self.db.set_reaction(message_id, user_id, emoji)
        }
        fn delete_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> anyhow::Result<bool> {
            self.check()?;
            self.db.delete_reaction(message_id, user_id, emoji)
        }
        fn mark_read(&self, message_id: Uuid, user_id: Uuid) -> anyhow::Result<bool> {
            self.check()?;
            self.db.mark_read(message_id, user_id)
        }
    }

    async fn open_flaky(key: Option<TripKey>) -> (ChatSession, Arc<FlakyStore>) {
        let store = Arc::new(FlakyStore {
            db: Database::open_in_memory().unwrap(),
            fail_writes: AtomicBool::new(false),
        });
        let user = CurrentUser::new(Uuid::new_v4(), "Ana");
        let session = ChatSession::open(
            Uuid::new_v4(),
            &StaticAuth::signed_in(user),
            store.clone(),
            Arc::new(LocalTransport::new(Hub::new())),
            SessionOptions {
                key,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        (session, store)
    }

    #[tokio::test]
    async fn open_requires_a_user() {
        let result = ChatSession::open(
            Uuid::new_v4(),
            &StaticAuth::signed_out(),
            Arc::new(Database::open_in_memory().unwrap()),
            Arc::new(LocalTransport::new(Hub::new())),
            SessionOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(TripError::Authentication(_))));
    }

    #[tokio::test]
    async fn blank_text_is_a_no_op() {
        let (session, _) = open_flaky(None).await;
        assert!(session.send_message("   \n").await.unwrap().is_none());
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn failed_edit_restores_text_and_edited_at() {
        let (session, store) = open_flaky(None).await;
        let sent = session.send_message("see you at 8").await.unwrap().unwrap();
        let before = session.message(sent.id).unwrap();

        store.fail_writes.store(true, Ordering::SeqCst);
        let err = session.edit_message(sent.id, "see you at 9").await.unwrap_err();
        assert!(matches!(err, TripError::Persistence(_)));

        let after = session.message(sent.id).unwrap();
        assert_eq!(after.message, before.message);
        assert_eq!(after.edited_at, before.edited_at);
    }

    #[tokio::test]
    async fn failed_delete_reinserts_in_order() {
        let (session, store) = open_flaky(None).await;
        for text in ["one", "two", "three"] {
            session.send_message(text).await.unwrap();
        }
        let before = session.messages();

        store.fail_writes.store(true, Ordering::SeqCst);
        let err = session
            .delete_message(before[1].id, |_| true)
            .await
            .unwrap_err();
        assert!(matches!(err, TripError::Persistence(_)));
        assert_eq!(session.messages(), before);
    }

    #[tokio::test]
    async fn declined_confirmation_keeps_message() {
        let (session, _) = open_flaky(None).await;
        let sent = session.send_message("keep me").await.unwrap().unwrap();
        assert!(!session.delete_message(sent.id, |_| false).await.unwrap());
        assert!(session.message(sent.id).is_some());

        assert!(session.delete_message(sent.id, |_| true).await.unwrap());
        assert!(session.message(sent.id).is_none());
    }

    #[tokio::test]
    async fn reacting_twice_replaces_the_emoji() {
        let (session, _) = open_flaky(None).await;
        let sent = session.send_message("beach?").await.unwrap().unwrap();
        session.add_reaction(sent.id, "👍").await.unwrap();
        session.add_reaction(sent.id, "🏖️").await.unwrap();

        let msg = session.message(sent.id).unwrap();
        assert_eq!(msg.reactions.len(), 1);
        assert_eq!(msg.reactions[0].emoji, "🏖️");

        // The store agrees after a refetch
        session.refresh_history().await.unwrap();
        let msg = session.message(sent.id).unwrap();
        assert_eq!(msg.reactions.len(), 1);
        assert_eq!(msg.reactions[0].emoji, "🏖️");
    }

    #[tokio::test]
    async fn failed_reaction_rolls_back_to_previous_set() {
        let (session, store) = open_flaky(None).await;
        let sent = session.send_message("museum").await.unwrap().unwrap();
        session.add_reaction(sent.id, "👍").await.unwrap();
        let before = session.message(sent.id).unwrap().reactions;

        store.fail_writes.store(true, Ordering::SeqCst);
        assert!(session.add_reaction(sent.id, "👎").await.is_err());
        assert_eq!(session.message(sent.id).unwrap().reactions, before);

        assert!(session.remove_reaction(sent.id, "👍").await.is_err());
        assert_eq!(session.message(sent.id).unwrap().reactions, before);
    }

    #[tokio::test]
    async fn mark_as_read_is_idempotent() {
        let (session, _) = open_flaky(None).await;
        let sent = session.send_message("read me").await.unwrap().unwrap();
        let reader = Uuid::new_v4();

        assert!(session.mark_as_read(sent.id, reader).await.unwrap());
        assert!(!session.mark_as_read(sent.id, reader).await.unwrap());
        assert_eq!(session.message(sent.id).unwrap().read_by, vec![reader]);
    }

    #[tokio::test]
    async fn encrypted_text_is_stored_sealed_and_shown_plain() {
        let (session, store) = open_flaky(Some(TripKey::generate())).await;
        let sent = session.send_message("gate code 4411").await.unwrap().unwrap();
        assert_eq!(sent.message, "gate code 4411");

        let raw = store.db.get_message(sent.id).unwrap().unwrap();
        assert!(raw.encrypted);
        assert_ne!(raw.message, "gate code 4411");

        session.refresh_history().await.unwrap();
        assert_eq!(session.message(sent.id).unwrap().message, "gate code 4411");
    }

    #[tokio::test]
    async fn attachments_allow_blank_text() {
        let (session, _) = open_flaky(None).await;
        let attachment = Attachment {
            file_url: "https://files.example/map.pdf".into(),
            file_name: "map.pdf".into(),
            file_type: "application/pdf".into(),
            file_size: 2048,
            uploaded_by: session.user().id,
        };
        let sent = session
            .send_message_with_attachments("", vec![attachment.clone()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sent.attachments, vec![attachment]);
    }

    #[tokio::test]
    async fn writes_while_offline_are_kept() {
        let store = Arc::new(FlakyStore {
            db: Database::open_in_memory().unwrap(),
            fail_writes: AtomicBool::new(false),
        });
        let transport = LocalTransport::new(Hub::new());
        let session = ChatSession::open(
            Uuid::new_v4(),
            &StaticAuth::signed_in(CurrentUser::new(Uuid::new_v4(), "Ana")),
            store.clone(),
            Arc::new(transport.clone()),
            SessionOptions::default(),
        )
        .await
        .unwrap();
        let mut status = session.connection().status_changes();
        status
            .wait_for(|s| *s == ConnectionStatus::Connected)
            .await
            .unwrap();

        transport.set_online(false);
        transport.sever();
        status
            .wait_for(|s| *s != ConnectionStatus::Connected)
            .await
            .unwrap();

        let sent = session.send_message("no signal here").await.unwrap().unwrap();
        assert_eq!(session.message(sent.id).unwrap().message, "no signal here");
        assert!(store.db.get_message(sent.id).unwrap().is_some());

        session.edit_message(sent.id, "still no signal").await.unwrap();
        assert_eq!(session.message(sent.id).unwrap().message, "still no signal");
        let stored = store.db.get_message(sent.id).unwrap().unwrap();
        assert_eq!(stored.message, "still no signal");
        assert!(stored.edited_at.is_some());

        session.close();
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (session, _) = open_flaky(None).await;
        session.close();
        session.close();
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
    }
}
