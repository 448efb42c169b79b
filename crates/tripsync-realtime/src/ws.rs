use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use tripsync_types::events::Frame;

use crate::transport::{ChannelConfig, ChannelTransport, Subscription};

/// Subscribes through the gateway's `/realtime/{topic}` WebSocket.
#[derive(Debug, Clone)]
pub struct WsTransport {
    /// `ws://host:port`, no trailing slash.
    base_url: String,
    token: String,
}

impl WsTransport {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl ChannelTransport for WsTransport {
    async fn subscribe(&self, topic: &str, config: ChannelConfig) -> Result<Subscription> {
        let url = format!(
            "{}/realtime/{}?token={}&self_echo={}",
            self.base_url, topic, self.token, config.self_echo
        );
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("connecting to {}/realtime/{}", self.base_url, topic))?;
        info!("WebSocket open for {}", topic);

        let (mut write, mut read) = ws_stream.split();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();

        let topic = topic.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => match serde_json::from_str::<Frame>(&text) {
                                Ok(frame) => {
                                    if in_tx.send(frame).is_err() {
                                        break;
                                    }
                                }
                                Err(e) => warn!("Undecodable frame on {}: {}", topic, e),
                            },
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!("WebSocket error on {}: {}", topic, e);
                                break;
                            }
                        }
                    }
                    frame = out_rx.recv() => {
                        let Some(frame) = frame else {
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        };
                        let text = match serde_json::to_string(&frame) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("Failed to encode frame: {}", e);
                                continue;
                            }
                        };
                        if write.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("WebSocket pump for {} finished", topic);
        });

        Ok(Subscription {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
