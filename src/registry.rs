use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::NotificationType;

/// Payload pushed over a live channel. A thinner view of the durable row;
/// losing it never loses the inbox entry.
#[derive(Debug, Clone)]
pub struct Push {
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub related_activity_id: Option<Uuid>,
}

/// Owned map of user id to live notification channel, with explicit
/// connect/disconnect lifecycle. Transports (websocket, SSE) are out of scope
/// here and hold the receiving end.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: Mutex<HashMap<Uuid, mpsc::UnboundedSender<Push>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, mpsc::UnboundedSender<Push>>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a live channel for a user, returning the receiving end.
    /// A reconnect replaces the previous channel.
    pub fn connect(&self, user_id: Uuid) -> mpsc::UnboundedReceiver<Push> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().insert(user_id, tx);
        rx
    }

    pub fn disconnect(&self, user_id: Uuid) {
        self.lock().remove(&user_id);
    }

    /// Best-effort delivery. A user without a live channel, or whose receiver
    /// has gone away, simply misses the push; dead senders are pruned.
    pub fn push(&self, user_id: Uuid, push: Push) -> bool {
        let mut channels = self.lock();
        match channels.get(&user_id) {
            Some(sender) => {
                if sender.send(push).is_ok() {
                    true
                } else {
                    channels.remove(&user_id);
                    false
                }
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push() -> Push {
        Push {
            notification_type: NotificationType::ActivityApproved,
            title: "Activity Approved".to_string(),
            message: "Your activity 'AWS Certification' has been approved".to_string(),
            related_activity_id: None,
        }
    }

    #[test]
    fn delivers_to_connected_users_only() {
        let registry = ChannelRegistry::new();
        let user = Uuid::new_v4();
        let stranger = Uuid::new_v4();

        let mut rx = registry.connect(user);
        assert!(registry.push(user, push()));
        assert!(!registry.push(stranger, push()));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.title, "Activity Approved");
    }

    #[test]
    fn disconnect_removes_the_channel() {
        let registry = ChannelRegistry::new();
        let user = Uuid::new_v4();

        let mut rx = registry.connect(user);
        registry.disconnect(user);
        assert!(!registry.push(user, push()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_receivers_are_pruned_on_send() {
        let registry = ChannelRegistry::new();
        let user = Uuid::new_v4();

        let rx = registry.connect(user);
        drop(rx);
        assert!(!registry.push(user, push()));
        // Second push hits the pruned map, not a dead sender.
        assert!(!registry.push(user, push()));
    }
}
