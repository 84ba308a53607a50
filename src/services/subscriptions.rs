//! Match event subscription registry
//!
//! Subscribers receive match events over bounded channels. Delivery is
//! best-effort: a full buffer drops the event for that subscriber only,
//! and a closed channel retires the subscriber. A blank station id on an
//! event marks it global; every subscriber receives it.

use crate::domain::types::{short_id, MatchEvent};
use crate::infra::Metrics;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

struct SubscriberHandle {
    // Empty interest set means global events only
    station_ids: Vec<String>,
    tx: mpsc::Sender<MatchEvent>,
}

impl SubscriberHandle {
    fn wants(&self, event: &MatchEvent) -> bool {
        event.station_area_id.is_empty()
            || self.station_ids.iter().any(|s| s == &event.station_area_id)
    }
}

pub struct SubscriptionRegistry {
    subscribers: Mutex<FxHashMap<String, SubscriberHandle>>,
    buffer: usize,
    metrics: Arc<Metrics>,
}

impl SubscriptionRegistry {
    pub fn new(buffer: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            subscribers: Mutex::new(FxHashMap::default()),
            buffer: buffer.max(1),
            metrics,
        }
    }

    /// Register a subscriber interested in the given stations (empty set
    /// means global events only). The first event on the channel is a
    /// welcome marker so clients can confirm the stream is live. Clients
    /// may supply their own id; a blank or absent one gets a generated id.
    pub fn subscribe(
        &self,
        client_id: Option<String>,
        station_ids: Vec<String>,
    ) -> (String, mpsc::Receiver<MatchEvent>) {
        let subscriber_id = client_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| short_id("sub", 8));
        let (tx, rx) = mpsc::channel(self.buffer);

        let welcome = MatchEvent {
            event_id: short_id("welcome", 6),
            station_area_id: String::new(),
            result: None,
        };
        // Buffer is empty at this point, so the welcome always fits
        let _ = tx.try_send(welcome);

        self.subscribers
            .lock()
            .insert(subscriber_id.clone(), SubscriberHandle { station_ids, tx });

        info!(subscriber_id = %subscriber_id, "subscriber_registered");
        (subscriber_id, rx)
    }

    pub fn unsubscribe(&self, subscriber_id: &str) {
        if self.subscribers.lock().remove(subscriber_id).is_some() {
            info!(subscriber_id = %subscriber_id, "subscriber_removed");
        }
    }

    /// Fan an event out to every interested subscriber
    pub fn broadcast(&self, event: MatchEvent) {
        self.metrics.record_broadcast();
        let mut dead = Vec::new();

        {
            let subscribers = self.subscribers.lock();
            for (id, handle) in subscribers.iter() {
                if !handle.wants(&event) {
                    continue;
                }
                match handle.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        self.metrics.record_event_dropped();
                        warn!(subscriber_id = %id, event_id = %event.event_id, "subscriber_buffer_full");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        dead.push(id.clone());
                    }
                }
            }
        }

        if !dead.is_empty() {
            let mut subscribers = self.subscribers.lock();
            for id in dead {
                if subscribers.remove(&id).is_some() {
                    self.metrics.record_subscriber_retired();
                    debug!(subscriber_id = %id, "subscriber_retired");
                }
            }
        }
    }

    pub fn count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::MatchResult;

    fn event(station: &str) -> MatchEvent {
        MatchEvent {
            event_id: short_id("evt", 8),
            station_area_id: station.to_string(),
            result: Some(MatchResult {
                station_area_id: station.to_string(),
                ..MatchResult::default()
            }),
        }
    }

    fn registry() -> SubscriptionRegistry {
        SubscriptionRegistry::new(8, Arc::new(Metrics::new()))
    }

    #[tokio::test]
    async fn test_welcome_event_sent_first() {
        let registry = registry();
        let (_, mut rx) = registry.subscribe(None, vec!["S1".to_string()]);

        let welcome = rx.recv().await.unwrap();
        assert!(welcome.event_id.starts_with("welcome-"));
        assert!(welcome.station_area_id.is_empty());
        assert!(welcome.result.is_none());
    }

    #[tokio::test]
    async fn test_station_filtering() {
        let registry = registry();
        let (_, mut rx) = registry.subscribe(None, vec!["S1".to_string()]);
        rx.recv().await.unwrap(); // welcome

        registry.broadcast(event("S2"));
        registry.broadcast(event("S1"));

        let got = rx.recv().await.unwrap();
        assert_eq!(got.station_area_id, "S1");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_global_event_reaches_everyone() {
        let registry = registry();
        let (_, mut interested) = registry.subscribe(None, vec!["S1".to_string()]);
        let (_, mut global_only) = registry.subscribe(None, Vec::new());
        interested.recv().await.unwrap();
        global_only.recv().await.unwrap();

        registry.broadcast(event(""));
        registry.broadcast(event("S1"));

        assert!(interested.recv().await.unwrap().station_area_id.is_empty());
        assert_eq!(interested.recv().await.unwrap().station_area_id, "S1");
        // Empty interest set receives only the global event
        assert!(global_only.recv().await.unwrap().station_area_id.is_empty());
        assert!(global_only.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_buffer_drops_event_only() {
        let registry = SubscriptionRegistry::new(1, Arc::new(Metrics::new()));
        let (_, mut rx) = registry.subscribe(None, vec!["S1".to_string()]);
        // Welcome fills the single-slot buffer; next broadcast is dropped
        registry.broadcast(event("S1"));

        assert_eq!(registry.count(), 1);
        assert!(rx.recv().await.unwrap().event_id.starts_with("welcome-"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_channel_retires_subscriber() {
        let registry = registry();
        let (_, rx) = registry.subscribe(None, vec!["S1".to_string()]);
        drop(rx);

        registry.broadcast(event("S1"));
        assert_eq!(registry.count(), 0);
    }
}
