//! Telemetry evaluation and ingest
//!
//! Every telemetry message updates the driver's snapshot and then walks
//! the route looking for upcoming stations within the ETA window. A
//! debounce gate per (driver, station) pair keeps a stream of messages
//! from re-triggering the same evaluation: a pair re-fires only when the
//! ETA strictly improves or the refresh interval has elapsed on the
//! telemetry clock.
//!
//! Ingest runs one worker task per driver fed by a bounded lane, so
//! messages from one driver are processed in order while drivers stay
//! independent.

use crate::domain::messages::{DriverEta, EvaluateDriverRequest};
use crate::domain::types::DriverTelemetry;
use crate::infra::Metrics;
use crate::services::coordinator::Matcher;
use crate::services::route_cache::RoutePlanCache;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};

struct TriggerState {
    eta_minutes: i64,
    triggered_at: DateTime<Utc>,
}

pub struct TelemetryEvaluator {
    // Latest state per driver, newest timestamp wins
    snapshots: RwLock<FxHashMap<String, DriverTelemetry>>,
    triggers: Mutex<FxHashMap<(String, String), TriggerState>>,
    route_cache: Arc<RoutePlanCache>,
    matcher: Arc<dyn Matcher>,
    metrics: Arc<Metrics>,
    eta_window: i64,
    trigger_refresh: Duration,
}

impl TelemetryEvaluator {
    pub fn new(
        route_cache: Arc<RoutePlanCache>,
        matcher: Arc<dyn Matcher>,
        metrics: Arc<Metrics>,
        eta_window: i64,
        trigger_refresh: Duration,
    ) -> Self {
        Self {
            snapshots: RwLock::new(FxHashMap::default()),
            triggers: Mutex::new(FxHashMap::default()),
            route_cache,
            matcher,
            metrics,
            eta_window,
            trigger_refresh,
        }
    }

    /// Process one telemetry message end to end
    pub async fn process(&self, telemetry: DriverTelemetry) {
        let start = Instant::now();

        if !self.upsert_snapshot(&telemetry) {
            debug!(driver_id = %telemetry.driver_id, "stale_telemetry_ignored");
            return;
        }

        if !telemetry.route_id.is_empty() {
            self.evaluate(&telemetry).await;
        }

        self.metrics.record_telemetry_processed(start.elapsed().as_micros() as u64);
    }

    /// Returns false when the message is older than the stored snapshot
    fn upsert_snapshot(&self, telemetry: &DriverTelemetry) -> bool {
        let mut snapshots = self.snapshots.write();
        if let Some(existing) = snapshots.get(&telemetry.driver_id) {
            if existing.ts > telemetry.ts {
                return false;
            }
        }
        snapshots.insert(telemetry.driver_id.clone(), telemetry.clone());
        true
    }

    async fn evaluate(&self, telemetry: &DriverTelemetry) {
        let cached = match self
            .route_cache
            .resolve(&telemetry.driver_id, &telemetry.route_id)
            .await
        {
            Ok(cached) => cached,
            Err(e) => {
                warn!(route_id = %telemetry.route_id, error = %e, "route_resolve_failed");
                return;
            }
        };
        let plan = &cached.plan;

        let Some(current) = plan.stop_at_area(&telemetry.current_area_id) else {
            debug!(
                driver_id = %telemetry.driver_id,
                area = %telemetry.current_area_id,
                "area_not_on_route"
            );
            return;
        };

        let seats = cached.capacity.saturating_sub(telemetry.occupancy);
        if seats == 0 {
            debug!(driver_id = %telemetry.driver_id, "shuttle_full");
            return;
        }

        // The current stop itself counts when it is a station (eta 0)
        for stop in &plan.stops {
            if stop.sequence < current.sequence || !stop.is_station {
                continue;
            }
            let eta = stop.arrival_offset_minutes - current.arrival_offset_minutes;
            if eta < 0 || eta > self.eta_window {
                continue;
            }
            if !self.debounce_allows(telemetry, &stop.area_id, eta) {
                continue;
            }

            self.metrics.record_trigger();
            debug!(
                driver_id = %telemetry.driver_id,
                station = %stop.area_id,
                eta_minutes = eta,
                seats = seats,
                "match_evaluation_triggered"
            );

            let req = EvaluateDriverRequest {
                driver_id: telemetry.driver_id.clone(),
                route_id: telemetry.route_id.clone(),
                station_area_id: stop.area_id.clone(),
                driver_current_area_id: telemetry.current_area_id.clone(),
                destination_area_id: plan.final_area_id.clone(),
                seats_available: seats as i32,
                eta_to_station_minutes: eta,
                driver_last_update: telemetry.ts,
            };
            self.matcher.evaluate_driver(req).await;
            self.mark_triggered(telemetry, &stop.area_id, eta);
        }
    }

    fn debounce_allows(&self, telemetry: &DriverTelemetry, station: &str, eta: i64) -> bool {
        let triggers = self.triggers.lock();
        match triggers.get(&(telemetry.driver_id.clone(), station.to_string())) {
            None => true,
            Some(state) => {
                eta < state.eta_minutes
                    || telemetry.ts - state.triggered_at > self.trigger_refresh
            }
        }
    }

    // Only called after the evaluation was dispatched, so a failed
    // dispatch never burns the debounce window
    fn mark_triggered(&self, telemetry: &DriverTelemetry, station: &str, eta: i64) {
        self.triggers.lock().insert(
            (telemetry.driver_id.clone(), station.to_string()),
            TriggerState { eta_minutes: eta, triggered_at: telemetry.ts },
        );
    }

    /// ETA answer for a driver/station pair based on the latest snapshot
    pub async fn driver_eta(&self, driver_id: &str, station_area_id: &str) -> DriverEta {
        let unreachable = DriverEta {
            driver_id: driver_id.to_string(),
            station_area_id: station_area_id.to_string(),
            reachable: false,
            eta_minutes: 0,
        };

        let Some(snapshot) = self.snapshot(driver_id) else {
            return unreachable;
        };
        if snapshot.route_id.is_empty() {
            return unreachable;
        }
        let Ok(cached) = self
            .route_cache
            .resolve(&snapshot.driver_id, &snapshot.route_id)
            .await
        else {
            return unreachable;
        };
        let plan = &cached.plan;
        let (Some(current), Some(target)) = (
            plan.stop_at_area(&snapshot.current_area_id),
            plan.stop_at_area(station_area_id),
        ) else {
            return unreachable;
        };
        if target.sequence < current.sequence {
            return unreachable;
        }

        DriverEta {
            eta_minutes: target.arrival_offset_minutes - current.arrival_offset_minutes,
            reachable: true,
            ..unreachable
        }
    }

    pub fn snapshot(&self, driver_id: &str) -> Option<DriverTelemetry> {
        self.snapshots.read().get(driver_id).cloned()
    }

    pub fn active_drivers(&self) -> usize {
        self.snapshots.read().len()
    }
}

/// Routes telemetry into per-driver lanes, one worker task per driver
pub struct TelemetryIngest {
    evaluator: Arc<TelemetryEvaluator>,
    lanes: Mutex<FxHashMap<String, mpsc::Sender<DriverTelemetry>>>,
    capacity: usize,
    metrics: Arc<Metrics>,
}

impl TelemetryIngest {
    pub fn new(evaluator: Arc<TelemetryEvaluator>, capacity: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            evaluator,
            lanes: Mutex::new(FxHashMap::default()),
            capacity: capacity.max(1),
            metrics,
        }
    }

    /// Queue a message onto the driver's lane. Never blocks; a full lane
    /// drops the message, which is safe because only the newest state
    /// matters.
    pub fn submit(&self, telemetry: DriverTelemetry) {
        let tx = self.lane(&telemetry.driver_id);
        match tx.try_send(telemetry) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(t)) => {
                self.metrics.record_telemetry_dropped();
                warn!(driver_id = %t.driver_id, "telemetry_lane_full");
            }
            Err(mpsc::error::TrySendError::Closed(t)) => {
                // Worker panicked; start a fresh lane and requeue
                warn!(driver_id = %t.driver_id, "telemetry_lane_restarted");
                self.lanes.lock().remove(&t.driver_id);
                let tx = self.lane(&t.driver_id);
                let _ = tx.try_send(t);
            }
        }
    }

    fn lane(&self, driver_id: &str) -> mpsc::Sender<DriverTelemetry> {
        let mut lanes = self.lanes.lock();
        if let Some(tx) = lanes.get(driver_id) {
            return tx.clone();
        }

        let (tx, mut rx) = mpsc::channel(self.capacity);
        let evaluator = self.evaluator.clone();
        tokio::spawn(async move {
            while let Some(telemetry) = rx.recv().await {
                evaluator.process(telemetry).await;
            }
        });

        lanes.insert(driver_id.to_string(), tx.clone());
        tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ServiceError;
    use crate::domain::messages::MatchResponse;
    use crate::domain::route::{RoutePlan, RouteStop};
    use crate::services::route_cache::{DriverLookup, DriverSnapshot};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::time::Duration as StdDuration;

    struct FixedLookup {
        plan: RoutePlan,
        capacity: u32,
    }

    #[async_trait]
    impl DriverLookup for FixedLookup {
        async fn get_driver(&self, _driver_id: &str) -> Result<DriverSnapshot, ServiceError> {
            Ok(DriverSnapshot { capacity: self.capacity, routes: vec![self.plan.clone()] })
        }
    }

    struct RecordingMatcher {
        requests: Mutex<Vec<EvaluateDriverRequest>>,
    }

    #[async_trait]
    impl Matcher for RecordingMatcher {
        async fn evaluate_driver(&self, req: EvaluateDriverRequest) -> MatchResponse {
            self.requests.lock().push(req);
            MatchResponse::unmatched("test")
        }
    }

    fn stop(seq: u32, area: &str, station: bool, offset: i64) -> RouteStop {
        RouteStop {
            sequence: seq,
            area_id: area.to_string(),
            is_station: station,
            arrival_offset_minutes: offset,
        }
    }

    fn plan() -> RoutePlan {
        RoutePlan {
            route_id: "r1".to_string(),
            driver_id: "d1".to_string(),
            final_area_id: "Z".to_string(),
            created_at: Utc::now(),
            stops: vec![
                stop(0, "A", false, 0),
                stop(1, "A2", false, 2),
                stop(2, "S1", true, 4),
                stop(3, "B", false, 8),
                stop(4, "S2", true, 20),
                stop(5, "Z", false, 25),
            ],
        }
    }

    fn t(minute: u32, second: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 29, 10, minute, second).unwrap()
    }

    fn telemetry(area: &str, ts: chrono::DateTime<Utc>) -> DriverTelemetry {
        DriverTelemetry {
            driver_id: "d1".to_string(),
            route_id: "r1".to_string(),
            current_area_id: area.to_string(),
            occupancy: 1,
            ts,
        }
    }

    fn evaluator(capacity: u32) -> (Arc<TelemetryEvaluator>, Arc<RecordingMatcher>) {
        let metrics = Arc::new(Metrics::new());
        let lookup = Arc::new(FixedLookup { plan: plan(), capacity });
        let cache = Arc::new(RoutePlanCache::new(
            lookup.clone(),
            StdDuration::from_secs(300),
            metrics.clone(),
        ));
        let matcher = Arc::new(RecordingMatcher { requests: Mutex::new(Vec::new()) });
        let evaluator = Arc::new(TelemetryEvaluator::new(
            cache,
            matcher.clone(),
            metrics,
            10,
            Duration::minutes(2),
        ));
        (evaluator, matcher)
    }

    #[tokio::test]
    async fn test_triggers_only_stations_in_window() {
        let (evaluator, matcher) = evaluator(4);
        // From A: S1 at eta 4 is in the window, S2 at eta 20 is not
        evaluator.process(telemetry("A", t(0, 0))).await;

        let requests = matcher.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].station_area_id, "S1");
        assert_eq!(requests[0].eta_to_station_minutes, 4);
        assert_eq!(requests[0].destination_area_id, "Z");
        assert_eq!(requests[0].seats_available, 3);
    }

    #[tokio::test]
    async fn test_debounce_blocks_same_eta() {
        let (evaluator, matcher) = evaluator(4);
        evaluator.process(telemetry("A", t(0, 0))).await;
        evaluator.process(telemetry("A", t(0, 30))).await;

        assert_eq!(matcher.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_debounce_allows_eta_improvement() {
        let (evaluator, matcher) = evaluator(4);
        // From A the S1 eta is 4; moving to A2 improves it to 2
        evaluator.process(telemetry("A", t(0, 0))).await;
        evaluator.process(telemetry("A2", t(0, 30))).await;

        let requests = matcher.requests.lock();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].eta_to_station_minutes, 2);
    }

    #[tokio::test]
    async fn test_debounce_refresh_measured_on_telemetry_clock() {
        let (evaluator, matcher) = evaluator(4);
        evaluator.process(telemetry("A", t(0, 0))).await;
        // 2 minutes exactly is not "elapsed"; strictly greater is
        evaluator.process(telemetry("A", t(2, 0))).await;
        assert_eq!(matcher.requests.lock().len(), 1);

        evaluator.process(telemetry("A", t(2, 1))).await;
        assert_eq!(matcher.requests.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_out_of_order_telemetry_ignored() {
        let (evaluator, matcher) = evaluator(4);
        evaluator.process(telemetry("B", t(5, 0))).await;
        evaluator.process(telemetry("A", t(1, 0))).await;

        assert_eq!(evaluator.snapshot("d1").unwrap().current_area_id, "B");
        // The stale message from A must not trigger S1
        assert!(matcher.requests.lock().iter().all(|r| r.station_area_id != "S1"));
    }

    #[tokio::test]
    async fn test_blank_route_only_updates_snapshot() {
        let (evaluator, matcher) = evaluator(4);
        let mut msg = telemetry("A", t(0, 0));
        msg.route_id = String::new();
        evaluator.process(msg).await;

        assert!(evaluator.snapshot("d1").is_some());
        assert!(matcher.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_full_shuttle_skips_evaluation() {
        // Capacity 1 with occupancy 1 leaves no seats
        let (evaluator, matcher) = evaluator(1);
        evaluator.process(telemetry("A", t(0, 0))).await;

        assert!(matcher.requests.lock().is_empty());
        assert!(evaluator.snapshot("d1").is_some());
    }

    #[tokio::test]
    async fn test_station_at_current_stop_triggers_with_zero_eta() {
        let (evaluator, matcher) = evaluator(4);
        evaluator.process(telemetry("S1", t(0, 0))).await;

        let requests = matcher.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].station_area_id, "S1");
        assert_eq!(requests[0].eta_to_station_minutes, 0);
    }

    #[tokio::test]
    async fn test_driver_eta() {
        let (evaluator, _) = evaluator(4);
        evaluator.process(telemetry("A", t(0, 0))).await;

        let eta = evaluator.driver_eta("d1", "S2").await;
        assert!(eta.reachable);
        assert_eq!(eta.eta_minutes, 20);

        // Already passed
        evaluator.process(telemetry("B", t(1, 0))).await;
        assert!(!evaluator.driver_eta("d1", "S1").await.reachable);
        // Unknown driver
        assert!(!evaluator.driver_eta("ghost", "S1").await.reachable);
    }

    #[tokio::test]
    async fn test_ingest_preserves_per_driver_order() {
        let (evaluator, matcher) = evaluator(4);
        let ingest = TelemetryIngest::new(evaluator.clone(), 64, Arc::new(Metrics::new()));

        ingest.submit(telemetry("A", t(0, 0)));
        ingest.submit(telemetry("B", t(1, 0)));

        // Wait for the worker to drain the lane
        for _ in 0..100 {
            if evaluator.snapshot("d1").map(|s| s.current_area_id == "B").unwrap_or(false) {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
        assert_eq!(evaluator.snapshot("d1").unwrap().current_area_id, "B");
        assert_eq!(matcher.requests.lock().len(), 1);
    }
}
