use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Notification;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("notification sink unavailable: {0}")]
    Unavailable(String),
}

/// Where lifecycle notifications go. Emission is fire-and-forget for the
/// engine: an error is logged and the transition stands.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn emit(&self, notification: Notification) -> Result<(), SinkError>;
}

/// In-process sink: keeps a per-user inbox and fans out live to subscribers.
pub struct NotifyHub {
    inboxes: DashMap<Ulid, Vec<Notification>>,
    channels: DashMap<Ulid, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            inboxes: DashMap::new(),
            channels: DashMap::new(),
        }
    }

    /// Live feed of notifications for one user. Creates the channel if needed.
    pub fn subscribe(&self, user_id: Ulid) -> broadcast::Receiver<Notification> {
        self.channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Inbox for a user, newest first.
    pub fn for_user(&self, user_id: Ulid) -> Vec<Notification> {
        let mut list = self
            .inboxes
            .get(&user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        list
    }

    pub fn has_unread(&self, user_id: Ulid) -> bool {
        self.inboxes
            .get(&user_id)
            .is_some_and(|inbox| inbox.iter().any(|n| !n.read))
    }

    /// Mark one notification read. Returns false when it is unknown.
    pub fn mark_read(&self, user_id: Ulid, notification_id: Ulid) -> bool {
        let Some(mut inbox) = self.inboxes.get_mut(&user_id) else {
            return false;
        };
        match inbox.iter_mut().find(|n| n.id == notification_id) {
            Some(n) => {
                n.read = true;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl NotificationSink for NotifyHub {
    async fn emit(&self, notification: Notification) -> Result<(), SinkError> {
        if let Some(sender) = self.channels.get(&notification.user_id) {
            // No receivers is fine; the inbox still has it.
            let _ = sender.send(notification.clone());
        }
        self.inboxes
            .entry(notification.user_id)
            .or_default()
            .push(notification);
        Ok(())
    }
}
