use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::{
    Router,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use tripsync_types::auth::CurrentUser;
use tripsync_types::events::{ChatEvent, Frame, SystemStatus, normalize};

use crate::auth::decode_token;
use crate::hub::Hub;

/// Server pings every 15 seconds; two unanswered pings drop the socket.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

const TOPIC_PREFIX: &str = "trip-";

#[derive(Clone)]
pub struct GatewayState {
    pub hub: Hub,
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub token: String,
    #[serde(default = "default_self_echo")]
    pub self_echo: bool,
}

fn default_self_echo() -> bool {
    true
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/realtime/{topic}", get(ws_upgrade))
        .with_state(state)
}

/// The token is checked before upgrading so a bad one gets a plain 401.
async fn ws_upgrade(
    State(state): State<GatewayState>,
    Path(topic): Path<String>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let user: CurrentUser = match decode_token(&params.token, &state.jwt_secret) {
        Ok(claims) => claims.into(),
        Err(e) => {
            warn!("Rejected realtime upgrade for {}: {}", topic, e);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };
    if !topic.starts_with(TOPIC_PREFIX) {
        return (StatusCode::BAD_REQUEST, "unknown topic").into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state.hub, topic, user, params.self_echo))
}

async fn handle_socket(socket: WebSocket, hub: Hub, topic: String, user: CurrentUser, self_echo: bool) {
    let (mut sender, mut receiver) = socket.split();
    let (conn_id, mut hub_rx) = hub.join(&topic);
    info!("{} ({}) subscribed to {}", user.display_name, user.id, topic);

    let subscribed = Frame::System {
        status: SystemStatus::Subscribed,
        message: None,
    };
    if send_frame(&mut sender, &subscribed).await.is_err() {
        return;
    }

    // Replies addressed to this socket only (pong frames)
    let (direct_tx, mut direct_rx) = mpsc::unbounded_channel::<Frame>();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

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
                    if msg.origin == conn_id && !self_echo {
                        continue;
                    }
                    if send_frame(&mut sender, &msg.frame).await.is_err() {
                        break;
                    }
                }
                frame = direct_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if send_frame(&mut sender, &frame).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout on {}, dropping subscription", conn_id);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_hub = hub.clone();
    let recv_topic = topic.clone();
    let author = user.id;
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<Frame>(&text) {
                    Ok(Frame::Broadcast { event, payload }) => {
                        if !authored_by(&event, &payload, author) {
                            warn!("Dropping {} frame on {} not sent as {}", event, conn_id, author);
                            continue;
                        }
                        recv_hub.publish(&recv_topic, conn_id, Frame::Broadcast { event, payload });
                    }
                    Ok(Frame::Ping) => {
                        if direct_tx.send(Frame::Pong).is_err() {
                            break;
                        }
                    }
                    Ok(other) => debug!("Ignoring client frame {:?}", other),
                    Err(e) => {
                        warn!(
                            "Bad frame on {}: {} -- raw: {}",
                            conn_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("{} ({}) left {}", user.display_name, user.id, topic);
}

/// A client may only publish known chat events under its own `sender_id`.
fn authored_by(event: &str, payload: &Value, user_id: Uuid) -> bool {
    if ChatEvent::from_name(event).is_none() {
        return false;
    }
    normalize(payload)
        .and_then(|record| record.get("sender_id"))
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        == Some(user_id)
}

async fn send_frame<S>(sender: &mut S, frame: &Frame) -> Result<(), ()>
where
    S: futures_util::Sink<Message> + Unpin,
{
    let text = serde_json::to_string(frame).map_err(|e| {
        warn!("Failed to encode frame: {}", e);
    })?;
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_own_sender_id_passes() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();

        assert!(authored_by("message_edit", &json!({ "id": Uuid::new_v4(), "sender_id": me }), me));
        assert!(authored_by("typing", &json!({ "payload": { "sender_id": me } }), me));
        assert!(!authored_by("message_delete", &json!({ "id": Uuid::new_v4(), "sender_id": other }), me));
        assert!(!authored_by("reaction", &json!({ "message_id": Uuid::new_v4() }), me));
        assert!(!authored_by("shutdown", &json!({ "sender_id": me }), me));
    }
}
