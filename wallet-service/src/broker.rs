//! Message broker
//!
//! Fans notifications out in-process to any number of subscribers and
//! carries address announcements so the blockchain monitor can grow its
//! watch set without polling storage. Delivery is best-effort: a send with
//! no subscribers is not an error, and per-wallet publish order follows the
//! storage-assigned notification ids.

use tokio::sync::broadcast;

use crate::model::Notification;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct MessageBroker {
    notifications: broadcast::Sender<Notification>,
    addresses: broadcast::Sender<String>,
}

impl MessageBroker {
    pub fn new() -> Self {
        let (notifications, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (addresses, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { notifications, addresses }
    }

    pub fn send(&self, notification: Notification) {
        log::debug!(
            "notification {} #{} wallet {}",
            notification.kind,
            notification.id,
            notification.wallet_id
        );
        let _ = self.notifications.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Announce a freshly created address to monitor watch sets.
    pub fn add_address(&self, address: String) {
        let _ = self.addresses.send(address);
    }

    pub fn on_new_address(&self) -> broadcast::Receiver<String> {
        self.addresses.subscribe()
    }
}

impl Default for MessageBroker {
    fn default() -> Self {
        Self::new()
    }
}
