use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::limits::FEED_CHANNEL_CAPACITY;
use crate::store::FeedItem;

/// Broadcast hub for change notifications, one channel per table.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<FeedItem>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for a table. Creates the channel if needed.
    pub fn subscribe(&self, table: &str) -> broadcast::Receiver<FeedItem> {
        let sender = self
            .channels
            .entry(table.to_string())
            .or_insert_with(|| broadcast::channel(FEED_CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, table: &str, item: FeedItem) {
        if let Some(sender) = self.channels.get(table) {
            let _ = sender.send(item);
        }
    }

    pub fn subscriber_count(&self, table: &str) -> usize {
        self.channels
            .get(table)
            .map_or(0, |sender| sender.receiver_count())
    }

    /// Drop a table's channel; open subscriptions see the feed close.
    pub fn remove(&self, table: &str) {
        self.channels.remove(table);
    }
}
