//! Rider intent store with atomic claims
//!
//! Intents are grouped per station behind a per-station mutex, so a claim
//! (scan, filter, remove) is a single critical section and two concurrent
//! match rounds can never hand the same rider to two drivers. Queues are
//! kept sorted by requested arrival; earlier riders claim first.

use crate::domain::types::RiderIntent;
use crate::infra::Metrics;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

struct StationQueue {
    // Sorted by requested_arrival ascending
    intents: Vec<RiderIntent>,
    last_activity: Instant,
}

impl StationQueue {
    fn new() -> Self {
        Self { intents: Vec::new(), last_activity: Instant::now() }
    }

    /// Drop intents strictly older than the TTL, returning how many
    /// were evicted. An intent aged exactly the TTL is still live.
    fn evict_stale(&mut self, ttl: chrono::Duration, as_of: DateTime<Utc>) -> u64 {
        let before = self.intents.len();
        self.intents.retain(|i| as_of - i.created_at <= ttl);
        (before - self.intents.len()) as u64
    }
}

pub struct RiderIntentStore {
    stations: Mutex<FxHashMap<String, Arc<Mutex<StationQueue>>>>,
    intent_ttl: chrono::Duration,
    idle_ttl: Duration,
    metrics: Arc<Metrics>,
}

impl RiderIntentStore {
    pub fn new(intent_ttl: chrono::Duration, idle_ttl: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            stations: Mutex::new(FxHashMap::default()),
            intent_ttl,
            idle_ttl,
            metrics,
        }
    }

    fn station(&self, station_area_id: &str) -> Arc<Mutex<StationQueue>> {
        let mut stations = self.stations.lock();
        stations
            .entry(station_area_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(StationQueue::new())))
            .clone()
    }

    /// Register an intent, keeping the queue sorted by requested
    /// arrival. Duplicates are permitted; a rider may hold several
    /// concurrent intents at one station and `remove` clears them all.
    ///
    /// The stations map stays locked for the whole insert so a
    /// concurrent `sweep_idle` cannot drop the queue between lookup
    /// and insert, which would strand the intent in an orphaned queue.
    pub fn add(&self, intent: RiderIntent) {
        let mut stations = self.stations.lock();
        let station = stations
            .entry(intent.station_area_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(StationQueue::new())))
            .clone();
        let mut queue = station.lock();

        let pos = queue
            .intents
            .partition_point(|i| i.requested_arrival <= intent.requested_arrival);
        queue.intents.insert(pos, intent);
        queue.last_activity = Instant::now();

        self.metrics.record_intent_added();
    }

    /// Atomically claim up to `limit` intents heading for `destination`
    /// who arrive by `pickup_by`, in requested-arrival order. Claimed
    /// intents are removed; stale intents encountered along the way are
    /// evicted. Party size is carried through but does not gate the
    /// claim.
    pub fn take_matching(
        &self,
        station_area_id: &str,
        destination_area_id: &str,
        limit: u32,
        pickup_by: DateTime<Utc>,
        as_of: DateTime<Utc>,
    ) -> Vec<RiderIntent> {
        if limit == 0 {
            return Vec::new();
        }

        let station = self.station(station_area_id);
        let mut queue = station.lock();

        let expired = queue.evict_stale(self.intent_ttl, as_of);
        if expired > 0 {
            self.metrics.record_intents_expired(expired);
            debug!(station = %station_area_id, expired = expired, "stale_intents_evicted");
        }

        let mut claimed = Vec::new();
        let mut kept = Vec::with_capacity(queue.intents.len());

        for intent in queue.intents.drain(..) {
            // A blank requested destination claims riders for any destination
            let dest_ok = destination_area_id.is_empty()
                || intent.destination_area_id.eq_ignore_ascii_case(destination_area_id);

            if dest_ok
                && claimed.len() < limit as usize
                && intent.requested_arrival <= pickup_by
            {
                claimed.push(intent);
            } else {
                kept.push(intent);
            }
        }
        queue.intents = kept;
        queue.last_activity = Instant::now();

        claimed
    }

    /// Remove all intents a rider holds at a station. Returns the count
    /// removed (0 means there was nothing to cancel).
    pub fn remove(&self, rider_id: &str, station_area_id: &str) -> usize {
        let station = self.station(station_area_id);
        let mut queue = station.lock();

        let before = queue.intents.len();
        queue.intents.retain(|i| i.rider_id != rider_id);
        let removed = before - queue.intents.len();
        queue.last_activity = Instant::now();

        if removed > 0 {
            self.metrics.record_intent_cancelled(removed as u64);
        }
        removed
    }

    /// Periodic maintenance: drop stations idle past the idle TTL and
    /// evict stale intents everywhere else.
    pub fn sweep_idle(&self, as_of: DateTime<Utc>) {
        let mut stations = self.stations.lock();
        let mut expired_total = 0u64;

        stations.retain(|station_id, queue| {
            let mut queue = queue.lock();
            if queue.last_activity.elapsed() > self.idle_ttl {
                expired_total += queue.intents.len() as u64;
                info!(station = %station_id, dropped = queue.intents.len(), "idle_station_dropped");
                false
            } else {
                expired_total += queue.evict_stale(self.intent_ttl, as_of);
                true
            }
        });

        if expired_total > 0 {
            self.metrics.record_intents_expired(expired_total);
        }
    }

    /// Number of unclaimed intents waiting at a station
    pub fn pending(&self, station_area_id: &str) -> usize {
        let stations = self.stations.lock();
        stations.get(station_area_id).map(|q| q.lock().intents.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> RiderIntentStore {
        RiderIntentStore::new(
            chrono::Duration::minutes(30),
            Duration::from_secs(3600),
            Arc::new(Metrics::new()),
        )
    }

    fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 29, 10, minute, 0).unwrap()
    }

    fn intent(rider: &str, arrival: DateTime<Utc>, party: u32) -> RiderIntent {
        RiderIntent {
            rider_id: rider.to_string(),
            station_area_id: "S1".to_string(),
            destination_area_id: "Z".to_string(),
            created_at: t(0),
            requested_arrival: arrival,
            party_size: party,
        }
    }

    #[test]
    fn test_claims_earliest_arrivals_within_deadline() {
        let store = store();
        // Riders requesting arrival 1 min ago, in 2 min, and in 20 min;
        // the driver arrives at T+10 with room for 2 claims
        store.add(intent("late", t(30), 1));
        store.add(intent("early", t(9), 1));
        store.add(intent("soon", t(12), 1));

        let claimed = store.take_matching("S1", "Z", 2, t(15), t(10));
        let ids: Vec<&str> = claimed.iter().map(|i| i.rider_id.as_str()).collect();
        assert_eq!(ids, vec!["early", "soon"]);
        assert_eq!(store.pending("S1"), 1);
    }

    #[test]
    fn test_destination_match_is_case_insensitive() {
        let store = store();
        let mut i = intent("r1", t(5), 1);
        i.destination_area_id = "downtown".to_string();
        store.add(i);

        let claimed = store.take_matching("S1", "DOWNTOWN", 4, t(15), t(10));
        assert_eq!(claimed.len(), 1);
    }

    #[test]
    fn test_blank_requested_destination_matches_any() {
        let store = store();
        store.add(intent("r1", t(5), 1));

        assert_eq!(store.take_matching("S1", "", 4, t(15), t(10)).len(), 1);
    }

    #[test]
    fn test_mismatched_destination_left_in_queue() {
        let store = store();
        store.add(intent("r1", t(5), 1));

        assert!(store.take_matching("S1", "harbor", 4, t(15), t(10)).is_empty());
        assert_eq!(store.pending("S1"), 1);
    }

    #[test]
    fn test_claims_count_intents_not_seats() {
        // A party of five is one intent; it claims ahead of later riders
        let store = store();
        store.add(intent("party", t(5), 5));
        store.add(intent("solo", t(6), 1));

        let claimed = store.take_matching("S1", "Z", 1, t(15), t(10));
        let ids: Vec<&str> = claimed.iter().map(|i| i.rider_id.as_str()).collect();
        assert_eq!(ids, vec!["party"]);
        assert_eq!(store.pending("S1"), 1);
    }

    #[test]
    fn test_stale_intents_evicted_on_claim() {
        let store = store();
        let mut old = intent("old", t(5), 1);
        old.created_at = t(0) - chrono::Duration::minutes(45);
        store.add(old);
        store.add(intent("fresh", t(5), 1));

        let claimed = store.take_matching("S1", "Z", 4, t(15), t(10));
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].rider_id, "fresh");
        assert_eq!(store.pending("S1"), 0);
    }

    #[test]
    fn test_intent_aged_exactly_ttl_still_claimable() {
        let store = store();
        let mut edge = intent("edge", t(5), 1);
        // Exactly 30 minutes old at claim time, not strictly older
        edge.created_at = t(10) - chrono::Duration::minutes(30);
        store.add(edge);

        let claimed = store.take_matching("S1", "Z", 4, t(15), t(10));
        assert_eq!(claimed.len(), 1);
    }

    #[test]
    fn test_duplicate_intents_permitted() {
        let store = store();
        store.add(intent("r1", t(5), 1));
        store.add(intent("r1", t(8), 2));

        assert_eq!(store.pending("S1"), 2);
    }

    #[test]
    fn test_cancel_removes_all_rider_intents() {
        let store = store();
        store.add(intent("r1", t(5), 1));
        store.add(intent("r1", t(8), 1));
        assert_eq!(store.remove("r1", "S1"), 2);
        assert_eq!(store.remove("r1", "S1"), 0);
        assert_eq!(store.pending("S1"), 0);
    }

    #[test]
    fn test_sweep_drops_idle_stations() {
        let store = RiderIntentStore::new(
            chrono::Duration::minutes(30),
            Duration::ZERO,
            Arc::new(Metrics::new()),
        );
        store.add(intent("r1", t(5), 1));

        store.sweep_idle(t(10));
        assert_eq!(store.pending("S1"), 0);

        // A queue dropped by the sweep is recreated on the next add and
        // its intents are claimable
        store.add(intent("r2", t(5), 1));
        assert_eq!(store.take_matching("S1", "Z", 4, t(15), t(10)).len(), 1);
    }

    #[test]
    fn test_concurrent_claims_never_duplicate_a_rider() {
        let store = Arc::new(store());
        for i in 0..64 {
            store.add(intent(&format!("r{}", i), t(5), 1));
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                store.take_matching("S1", "Z", 10, t(15), t(10))
            }));
        }

        let mut seen = std::collections::HashSet::new();
        let mut total = 0;
        for handle in handles {
            for claimed in handle.join().unwrap() {
                assert!(seen.insert(claimed.rider_id.clone()), "rider claimed twice");
                total += 1;
            }
        }
        assert_eq!(total, 64);
        assert_eq!(store.pending("S1"), 0);
    }
}
