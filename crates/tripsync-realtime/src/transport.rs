use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::warn;

use tripsync_types::events::{Frame, SystemStatus};

use crate::hub::Hub;

#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    /// Deliver the subscriber's own broadcasts back to it.
    pub self_echo: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { self_echo: true }
    }
}

/// A live subscription to one topic.
///
/// The transport first yields `System { status: Subscribed }` once the join
/// is acknowledged, then broadcasts and control frames. The inbound stream
/// ending means the channel is gone.
pub struct Subscription {
    pub outbound: mpsc::UnboundedSender<Frame>,
    pub inbound: mpsc::UnboundedReceiver<Frame>,
}

/// Something that can open a subscription to a broadcast topic.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn subscribe(&self, topic: &str, config: ChannelConfig) -> Result<Subscription>;
}

/// In-process transport straight onto a [`Hub`].
///
/// It can also be taken offline and have its live subscriptions severed,
/// which is how outages are simulated.
#[derive(Clone)]
pub struct LocalTransport {
    hub: Hub,
    online: Arc<AtomicBool>,
    live: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl LocalTransport {
    pub fn new(hub: Hub) -> Self {
        Self {
            hub,
            online: Arc::new(AtomicBool::new(true)),
            live: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// While offline, new subscriptions fail. Existing ones are untouched.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    /// Drop every live subscription; subscribers see their inbound stream end.
    pub fn sever(&self) {
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        for task in live.drain(..) {
            task.abort();
        }
    }
}

#[async_trait]
impl ChannelTransport for LocalTransport {
    async fn subscribe(&self, topic: &str, config: ChannelConfig) -> Result<Subscription> {
        if !self.online.load(Ordering::Acquire) {
            bail!("transport offline");
        }

        let (conn_id, mut hub_rx) = self.hub.join(topic);
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();

        let _ = in_tx.send(Frame::System {
            status: SystemStatus::Subscribed,
            message: None,
        });

        let hub = self.hub.clone();
        let topic = topic.to_string();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = hub_rx.recv() => {
                        let msg = match result {
                            Ok(msg) => msg,
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!("Subscription {} lagged by {} frames", conn_id, n);
                                continue;
                            }
                            Err(_) => break,
                        };
                        if msg.origin == conn_id && !config.self_echo {
                            continue;
                        }
                        if in_tx.send(msg.frame).is_err() {
                            break;
                        }
                    }
                    frame = out_rx.recv() => {
                        match frame {
                            Some(Frame::Ping) => {
                                let _ = in_tx.send(Frame::Pong);
                            }
                            Some(frame @ Frame::Broadcast { .. }) => {
                                hub.publish(&topic, conn_id, frame);
                            }
                            Some(_) => {}
                            None => break,
                        }
                    }
                }
            }
        });

        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        live.retain(|t| !t.is_finished());
        live.push(task);

        Ok(Subscription {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
