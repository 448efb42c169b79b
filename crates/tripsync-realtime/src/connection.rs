use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tripsync_types::auth::{Authenticator, CurrentUser};
use tripsync_types::events::{ChatEvent, Frame, InboundEvent, SystemStatus, topic_for_trip};
use tripsync_types::{Result, TripError};

use crate::config::RealtimeConfig;
use crate::transport::{ChannelConfig, ChannelTransport, Subscription};
use crate::typing::{TypingTracker, TypingUser};

/// Handlers registered under this name receive `{"status": ...}` on every
/// status transition.
pub const CONNECTION_EVENT: &str = "connection";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
    /// Reconnect attempts exhausted. Only a manual reconnect leaves this state.
    Failed,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

pub type HandlerId = u64;

type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Owns one broadcast-channel subscription for a trip chat and keeps it
/// alive with exponential-backoff reconnects.
///
/// Cheap to clone; all clones drive the same subscription.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn ChannelTransport>,
    config: RealtimeConfig,
    state: Mutex<State>,
    handlers: RwLock<HashMap<String, Vec<(HandlerId, EventHandler)>>>,
    next_handler_id: AtomicU64,
    status_tx: watch::Sender<ConnectionStatus>,
}

struct State {
    topic: Option<String>,
    user: Option<CurrentUser>,
    status: ConnectionStatus,
    attempts: u32,
    /// Bumped on every (re)connect and on disconnect; tasks from an older
    /// generation ignore whatever they observe.
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    connect_task: Option<JoinHandle<()>>,
    pump_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
    health_task: Option<JoinHandle<()>>,
    typing: TypingTracker,
}

impl State {
    fn abort_channel_tasks(&mut self) {
        for task in [
            self.connect_task.take(),
            self.pump_task.take(),
            self.health_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
        self.outbound = None;
    }

    fn abort_all(&mut self) {
        self.abort_channel_tasks();
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
    }
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn ChannelTransport>, config: RealtimeConfig) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let typing = TypingTracker::new(config.typing_timeout);
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                state: Mutex::new(State {
                    topic: None,
                    user: None,
                    status: ConnectionStatus::Disconnected,
                    attempts: 0,
                    generation: 0,
                    outbound: None,
                    connect_task: None,
                    pump_task: None,
                    reconnect_task: None,
                    health_task: None,
                    typing,
                }),
                handlers: RwLock::new(HashMap::new()),
                next_handler_id: AtomicU64::new(1),
                status_tx,
            }),
        }
    }

    /// Open the trip's channel as the signed-in user.
    ///
    /// Returns as soon as the subscribe has been issued; watch
    /// [`status`](Self::status) or the `connection` event for `connected`.
    /// Must be called from within a Tokio runtime.
    pub fn initialize(&self, trip_id: Uuid, auth: &dyn Authenticator) -> Result<()> {
        let user = auth
            .current_user()
            .ok_or_else(|| TripError::Authentication("no signed-in user".into()))?;

        {
            let mut st = self.inner.lock_state();
            st.abort_all();
            st.topic = Some(topic_for_trip(trip_id));
            st.user = Some(user);
            st.attempts = 0;
        }
        self.inner.connect();
        Ok(())
    }

    /// Publish an event to every subscriber, ourselves included when
    /// self-echo is on. Fails with [`TripError::Channel`] unless connected;
    /// nothing is queued for later.
    pub fn send(&self, event: ChatEvent, payload: Value) -> Result<()> {
        let st = self.inner.lock_state();
        if st.status != ConnectionStatus::Connected {
            return Err(TripError::Channel(format!("channel is {}", st.status)));
        }
        let tx = st
            .outbound
            .as_ref()
            .ok_or_else(|| TripError::Channel("no live subscription".into()))?;
        tx.send(Frame::broadcast(event, payload))
            .map_err(|_| TripError::Channel("subscription closed".into()))
    }

    /// Register a handler for an event name (`"message"`, `"typing"`, ...,
    /// or [`CONNECTION_EVENT`]). Several handlers per event are allowed; a
    /// panicking handler is logged and does not stop the others.
    pub fn on_event<F>(&self, event: &str, handler: F) -> HandlerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .write_handlers()
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn off_event(&self, id: HandlerId) -> bool {
        let mut handlers = self.inner.write_handlers();
        let mut removed = false;
        for list in handlers.values_mut() {
            let before = list.len();
            list.retain(|(hid, _)| *hid != id);
            removed |= list.len() != before;
        }
        handlers.retain(|_, list| !list.is_empty());
        removed
    }

    /// Reset the attempt counter and connect again. Works from any state,
    /// including after reconnects were exhausted.
    pub fn reconnect(&self) -> Result<()> {
        {
            let mut st = self.inner.lock_state();
            if st.topic.is_none() {
                return Err(TripError::Channel("not initialized".into()));
            }
            st.attempts = 0;
            if let Some(task) = st.reconnect_task.take() {
                task.abort();
            }
        }
        info!("Manual reconnect requested");
        self.inner.connect();
        Ok(())
    }

    /// Close the channel and forget every handler, timer and typing entry.
    /// Safe to call repeatedly.
    pub fn disconnect(&self) {
        let was_active = {
            let mut st = self.inner.lock_state();
            let active = st.topic.is_some() || st.status != ConnectionStatus::Disconnected;
            st.topic = None;
            st.generation += 1;
            st.attempts = 0;
            st.abort_all();
            st.typing.clear();
            active
        };
        if was_active {
            self.inner.transition(ConnectionStatus::Disconnected);
        }
        self.inner.write_handlers().clear();
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.lock_state().status
    }

    /// A receiver that observes every status change.
    pub fn status_changes(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn current_user(&self) -> Option<CurrentUser> {
        self.inner.lock_state().user.clone()
    }

    /// Peers currently typing; the local user never appears here.
    pub fn typing_users(&self) -> Vec<TypingUser> {
        self.inner.lock_state().typing.active()
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write_handlers(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Vec<(HandlerId, EventHandler)>>> {
        self.handlers.write().unwrap_or_else(|e| e.into_inner())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock_state().generation == generation
    }

    fn connect(self: &Arc<Self>) {
        let (topic, generation) = {
            let mut st = self.lock_state();
            let Some(topic) = st.topic.clone() else {
                return;
            };
            st.generation += 1;
            st.abort_channel_tasks();
            (topic, st.generation)
        };

        self.transition(ConnectionStatus::Connecting);

        let weak = Arc::downgrade(self);
        let transport = self.transport.clone();
        let config = ChannelConfig {
            self_echo: self.config.self_echo,
        };
        let task = tokio::spawn(async move {
            let result = transport.subscribe(&topic, config).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match result {
                Ok(sub) => inner.attach(generation, sub),
                Err(e) => {
                    warn!("Subscribe to {} failed: {}", topic, e);
                    inner.fail(generation, ConnectionStatus::Error);
                }
            }
        });

        let mut st = self.lock_state();
        if st.generation == generation {
            st.connect_task = Some(task);
        }
    }

    fn attach(self: &Arc<Self>, generation: u64, sub: Subscription) {
        let Subscription { outbound, inbound } = sub;
        let mut st = self.lock_state();
        if st.generation != generation {
            // Superseded while subscribing; dropping the halves closes it
            return;
        }
        st.outbound = Some(outbound);
        st.pump_task = Some(tokio::spawn(pump(Arc::downgrade(self), generation, inbound)));
    }

    fn on_subscribed(self: &Arc<Self>, generation: u64) {
        {
            let mut st = self.lock_state();
            if st.generation != generation {
                return;
            }
            st.attempts = 0;
        }
        self.transition(ConnectionStatus::Connected);

        // One liveness ping per connect; there is no periodic re-ping
        let weak = Arc::downgrade(self);
        let delay = self.config.health_check_delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                if inner.is_current(generation) {
                    debug!("Sending health check ping");
                    inner.send_frame(Frame::Ping);
                }
            }
        });
        let mut st = self.lock_state();
        if st.generation == generation {
            st.health_task = Some(task);
        } else {
            task.abort();
        }
    }

    fn fail(self: &Arc<Self>, generation: u64, status: ConnectionStatus) {
        {
            let mut st = self.lock_state();
            if st.generation != generation {
                return;
            }
            st.outbound = None;
            if let Some(task) = st.health_task.take() {
                task.abort();
            }
        }
        self.transition(status);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let next = {
            let mut st = self.lock_state();
            if st.topic.is_none() {
                return;
            }
            if st.attempts >= self.config.max_reconnect_attempts {
                None
            } else {
                let delay = self.config.reconnect_delay(st.attempts);
                st.attempts += 1;
                Some((delay, st.attempts))
            }
        };

        let Some((delay, attempt)) = next else {
            warn!(
                "Giving up after {} reconnect attempts",
                self.config.max_reconnect_attempts
            );
            self.transition(ConnectionStatus::Failed);
            return;
        };

        info!(
            "Reconnecting in {:?} (attempt {}/{})",
            delay, attempt, self.config.max_reconnect_attempts
        );
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.connect();
            }
        });
        let mut st = self.lock_state();
        if let Some(old) = st.reconnect_task.replace(task) {
            old.abort();
        }
    }

    fn send_frame(&self, frame: Frame) {
        let st = self.lock_state();
        if let Some(tx) = &st.outbound {
            let _ = tx.send(frame);
        }
    }

    fn deliver(&self, event: &str, payload: &Value) {
        if event == ChatEvent::Typing.as_str() {
            if let Some(InboundEvent::Typing(typing)) = InboundEvent::parse(ChatEvent::Typing, payload)
            {
                let mut st = self.lock_state();
                let is_self = st.user.as_ref().is_some_and(|u| u.id == typing.sender_id);
                if !is_self {
                    st.typing.observe(&typing);
                }
            }
        }
        self.dispatch(event, payload);
    }

    fn transition(&self, status: ConnectionStatus) {
        {
            let mut st = self.lock_state();
            if st.status == status {
                return;
            }
            info!("Realtime channel {} -> {}", st.status, status);
            st.status = status;
        }
        self.status_tx.send_replace(status);
        self.dispatch(CONNECTION_EVENT, &json!({ "status": status }));
    }

    fn dispatch(&self, event: &str, payload: &Value) {
        let handlers: Vec<EventHandler> = {
            let map = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            match map.get(event) {
                Some(list) => list.iter().map(|(_, h)| h.clone()).collect(),
                None => return,
            }
        };

        for handler in handlers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                error!("Handler for '{}' panicked: {}", event, reason);
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let st = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        st.abort_all();
    }
}

async fn pump(weak: Weak<Inner>, generation: u64, mut inbound: mpsc::UnboundedReceiver<Frame>) {
    while let Some(frame) = inbound.recv().await {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if !inner.is_current(generation) {
            return;
        }

        match frame {
            Frame::System {
                status: SystemStatus::Subscribed,
                ..
            } => inner.on_subscribed(generation),
            Frame::System { status, message } => {
                warn!(
                    "Channel reported {:?}: {}",
                    status,
                    message.as_deref().unwrap_or("no detail")
                );
                let next = match status {
                    SystemStatus::Error => ConnectionStatus::Error,
                    _ => ConnectionStatus::Disconnected,
                };
                inner.fail(generation, next);
                return;
            }
            Frame::Broadcast { event, payload } => inner.deliver(&event, &payload),
            Frame::Ping => inner.send_frame(Frame::Pong),
            Frame::Pong => debug!("Health check answered"),
        }
    }

    if let Some(inner) = weak.upgrade() {
        warn!("Channel subscription ended");
        inner.fail(generation, ConnectionStatus::Disconnected);
    }
}
