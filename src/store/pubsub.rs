//! In-process pub/sub hub

use dashmap::DashMap;
use tokio::sync::broadcast;

/// Per-channel buffer, matching the pub/sub worker channel size
pub const CHANNEL_BUFFER: usize = 16384;

/// Receiving end of a channel subscription
pub type ChannelReceiver = broadcast::Receiver<String>;

#[derive(Debug, Default)]
pub struct PubSub {
    channels: DashMap<String, broadcast::Sender<String>>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a message. Returns the number of receivers it reached.
    pub fn publish(&self, channel: &str, message: &str) -> usize {
        match self.channels.get(channel) {
            Some(tx) => tx.send(message.to_string()).unwrap_or(0),
            None => 0,
        }
    }

    pub fn subscribe(&self, channel: &str) -> ChannelReceiver {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_BUFFER).0)
            .subscribe()
    }

    /// Number of live subscribers on a channel
    pub fn subscribers(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let hub = PubSub::new();
        assert_eq!(hub.publish("metric-event", "lost"), 0);

        let mut rx = hub.subscribe("metric-event");
        assert_eq!(hub.publish("metric-event", "hello"), 1);
        assert_eq!(rx.recv().await.unwrap(), "hello");
    }

    #[test]
    fn test_subscriber_count() {
        let hub = PubSub::new();
        let _a = hub.subscribe("c");
        let _b = hub.subscribe("c");
        assert_eq!(hub.subscribers("c"), 2);
        assert_eq!(hub.subscribers("other"), 0);
    }
}
