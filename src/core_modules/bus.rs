// THEORY:
// The `bus` is an in-process publish/subscribe channel keyed by topic strings,
// the same shape a networked broker exposes to its clients. Every subscriber
// sees every message and filters by topic itself.
//
// Publishing never waits for delivery: a message with no live subscriber is
// simply dropped, exactly like a broker publish nobody listens to.

use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: String,
}

#[derive(Clone)]
pub struct MessageBus {
    tx: broadcast::Sender<BusMessage>,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel::<BusMessage>(capacity.max(1));
        Self { tx }
    }

    /// Fire-and-forget publish. Returns how many subscribers were handed the message.
    pub fn publish(&self, topic: &str, payload: impl Into<String>) -> usize {
        let message = BusMessage {
            topic: topic.to_string(),
            payload: payload.into(),
        };
        self.tx.send(message).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_topic_and_payload() {
        let bus = MessageBus::new(8);
        let mut rx = bus.subscribe();
        assert_eq!(bus.publish("camera/track/horizontal", "45"), 1);
        let message = rx.recv().await.unwrap();
        assert_eq!(message.topic, "camera/track/horizontal");
        assert_eq!(message.payload, "45");
    }

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let bus = MessageBus::new(8);
        assert_eq!(bus.publish("camera/track/command", "left"), 0);
    }
}
