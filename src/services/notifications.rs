//! Notification service
//!
//! Notifications are kept per user for later retrieval and, when the
//! user has a live watch channel open, pushed immediately. Delivery to a
//! full or closed watch channel is dropped; the stored copy is the
//! record.

use crate::domain::error::ServiceError;
use crate::domain::types::Notification;
use crate::services::coordinator::NotifyClient;
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

const WATCH_BUFFER: usize = 32;

pub struct NotificationService {
    inbox: Mutex<FxHashMap<String, Vec<Notification>>>,
    watchers: Mutex<FxHashMap<String, mpsc::Sender<Notification>>>,
}

impl NotificationService {
    pub fn new() -> Self {
        Self {
            inbox: Mutex::new(FxHashMap::default()),
            watchers: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn store(&self, note: Notification) {
        info!(user_id = %note.user_id, title = %note.title, "notification_pushed");

        let live = {
            let watchers = self.watchers.lock();
            watchers.get(&note.user_id).cloned()
        };
        if let Some(tx) = live {
            if tx.try_send(note.clone()).is_err() {
                debug!(user_id = %note.user_id, "notification_watch_stale");
                self.watchers.lock().remove(&note.user_id);
            }
        }

        self.inbox.lock().entry(note.user_id.clone()).or_default().push(note);
    }

    /// Notifications for a user, newest last
    pub fn list_for_user(&self, user_id: &str) -> Vec<Notification> {
        self.inbox.lock().get(user_id).cloned().unwrap_or_default()
    }

    /// Open a live channel for a user; replaces any previous watcher
    pub fn watch(&self, user_id: &str) -> mpsc::Receiver<Notification> {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        self.watchers.lock().insert(user_id.to_string(), tx);
        rx
    }
}

impl Default for NotificationService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotifyClient for NotificationService {
    async fn push(&self, note: Notification) -> Result<(), ServiceError> {
        self.store(note);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_list() {
        let service = NotificationService::new();
        service.store(Notification::new("u1", "Ride Matched", "shuttle inbound"));
        service.store(Notification::new("u1", "New Trip Assigned", "pickup at S1"));

        let notes = service.list_for_user("u1");
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].title, "Ride Matched");
        assert!(service.list_for_user("u2").is_empty());
    }

    #[tokio::test]
    async fn test_watch_receives_live_pushes() {
        let service = NotificationService::new();
        let mut rx = service.watch("u1");

        service.store(Notification::new("u1", "Ride Matched", "shuttle inbound"));
        service.store(Notification::new("u2", "Ride Matched", "not for u1"));

        let note = rx.recv().await.unwrap();
        assert_eq!(note.user_id, "u1");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_watcher_still_stores() {
        let service = NotificationService::new();
        let rx = service.watch("u1");
        drop(rx);

        service.store(Notification::new("u1", "Ride Matched", "shuttle inbound"));
        assert_eq!(service.list_for_user("u1").len(), 1);
    }
}
