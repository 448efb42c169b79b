use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use tripsync_types::events::Frame;

const TOPIC_CAPACITY: usize = 1024;

/// A frame published to a topic, tagged with the subscription that sent it
/// so receivers can filter their own echo.
#[derive(Debug, Clone)]
pub struct HubMessage {
    pub origin: Uuid,
    pub frame: Frame,
}

/// Fans frames out to every subscriber of a topic. One topic per trip chat.
#[derive(Clone, Default)]
pub struct Hub {
    inner: Arc<HubInner>,
}

#[derive(Default)]
struct HubInner {
    /// topic -> broadcast sender; every subscriber of the topic receives every frame
    topics: RwLock<HashMap<String, broadcast::Sender<HubMessage>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a topic. Returns a fresh subscription id and the receiver.
    pub fn join(&self, topic: &str) -> (Uuid, broadcast::Receiver<HubMessage>) {
        let mut topics = self.inner.topics.write().unwrap_or_else(|e| e.into_inner());

        // Drop topics nobody listens to any more
        topics.retain(|_, tx| tx.receiver_count() > 0);

        let rx = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe();
        let conn_id = Uuid::new_v4();
        debug!("Subscription {} joined {}", conn_id, topic);
        (conn_id, rx)
    }

    /// Publish to every subscriber of `topic`, the sender included. Returns
    /// how many subscribers the frame reached.
    pub fn publish(&self, topic: &str, origin: Uuid, frame: Frame) -> usize {
        let topics = self.inner.topics.read().unwrap_or_else(|e| e.into_inner());
        match topics.get(topic) {
            Some(tx) => tx.send(HubMessage { origin, frame }).unwrap_or(0),
            None => 0,
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.inner.topics.read().unwrap_or_else(|e| e.into_inner());
        topics.get(topic).map_or(0, |tx| tx.receiver_count())
    }

    /// Topics with at least one live subscriber.
    pub fn topic_count(&self) -> usize {
        let topics = self.inner.topics.read().unwrap_or_else(|e| e.into_inner());
        topics.values().filter(|tx| tx.receiver_count() > 0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tripsync_types::events::ChatEvent;

    #[tokio::test]
    async fn publish_reaches_topic_subscribers_only() {
        let hub = Hub::new();
        let (a, mut rx_a) = hub.join("trip-1-chat");
        let (_b, mut rx_b) = hub.join("trip-1-chat");
        let (_c, mut rx_c) = hub.join("trip-2-chat");
        assert_eq!(hub.topic_count(), 2);

        let frame = Frame::broadcast(ChatEvent::Typing, json!({ "sender_id": a }));
        assert_eq!(hub.publish("trip-1-chat", a, frame.clone()), 2);

        assert_eq!(rx_a.recv().await.unwrap().origin, a);
        assert_eq!(rx_b.recv().await.unwrap().frame, frame);
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn abandoned_topics_are_pruned() {
        let hub = Hub::new();
        let (_, rx) = hub.join("trip-1-chat");
        assert_eq!(hub.subscriber_count("trip-1-chat"), 1);
        drop(rx);

        hub.join("trip-2-chat");
        assert_eq!(hub.subscriber_count("trip-1-chat"), 0);
        assert_eq!(hub.publish("trip-1-chat", Uuid::new_v4(), Frame::Ping), 0);
    }
}
