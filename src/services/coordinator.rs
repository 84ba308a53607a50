//! Match coordinator - the decision point of the matching pipeline
//!
//! Takes evaluation requests (from the telemetry evaluator or directly
//! from the API), claims riders from the intent store, creates the trip,
//! notifies both sides, and fans the result out to subscribers.
//!
//! Trip creation and notifications are best-effort: a failed trip create
//! still reports the match (with a blank trip id) because the riders have
//! already been claimed and must not be silently lost.

use crate::domain::error::ServiceError;
use crate::domain::messages::{
    AddRiderIntentRequest, AddRiderIntentResponse, CancelRideIntentRequest,
    CancelRideIntentResponse, CreateTripRequest, EvaluateDriverRequest, MatchResponse,
};
use crate::domain::types::{short_id, MatchEvent, MatchResult, Notification, RiderIntent, Trip};
use crate::infra::Metrics;
use crate::services::intent_store::RiderIntentStore;
use crate::services::subscriptions::SubscriptionRegistry;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Downstream trip persistence
#[async_trait]
pub trait TripClient: Send + Sync {
    async fn create_trip(&self, req: &CreateTripRequest) -> Result<Trip, ServiceError>;
}

/// Downstream notification delivery
#[async_trait]
pub trait NotifyClient: Send + Sync {
    async fn push(&self, note: Notification) -> Result<(), ServiceError>;
}

/// Entry point the telemetry evaluator dispatches through
#[async_trait]
pub trait Matcher: Send + Sync {
    async fn evaluate_driver(&self, req: EvaluateDriverRequest) -> MatchResponse;
}

pub struct MatchCoordinator {
    intents: Arc<RiderIntentStore>,
    registry: Arc<SubscriptionRegistry>,
    trips: Arc<dyn TripClient>,
    notifier: Arc<dyn NotifyClient>,
    metrics: Arc<Metrics>,
    pickup_grace: Duration,
}

impl MatchCoordinator {
    pub fn new(
        intents: Arc<RiderIntentStore>,
        registry: Arc<SubscriptionRegistry>,
        trips: Arc<dyn TripClient>,
        notifier: Arc<dyn NotifyClient>,
        metrics: Arc<Metrics>,
        pickup_grace: Duration,
    ) -> Self {
        Self { intents, registry, trips, notifier, metrics, pickup_grace }
    }

    pub fn add_rider_intent(
        &self,
        req: &AddRiderIntentRequest,
    ) -> Result<AddRiderIntentResponse, ServiceError> {
        if req.rider_id.trim().is_empty() {
            return Err(ServiceError::InvalidArgument("rider_id cannot be blank".into()));
        }
        if req.station_area_id.trim().is_empty() {
            return Err(ServiceError::InvalidArgument("station_area_id cannot be blank".into()));
        }
        if req.party_size == 0 {
            return Err(ServiceError::InvalidArgument("party_size must be positive".into()));
        }

        self.intents.add(RiderIntent {
            rider_id: req.rider_id.clone(),
            station_area_id: req.station_area_id.clone(),
            destination_area_id: req.destination_area_id.clone(),
            created_at: Utc::now(),
            requested_arrival: req.arrival_time,
            party_size: req.party_size,
        });

        info!(rider_id = %req.rider_id, station = %req.station_area_id, "rider_intent_added");

        // Lightweight marker so subscribers can react without polling;
        // carries no rider or trip detail
        self.registry.broadcast(MatchEvent {
            event_id: short_id("evt", 8),
            station_area_id: req.station_area_id.clone(),
            result: Some(MatchResult {
                station_area_id: req.station_area_id.clone(),
                destination_area_id: req.destination_area_id.clone(),
                ..MatchResult::default()
            }),
        });

        Ok(AddRiderIntentResponse { success: true, msg: "intent registered".to_string() })
    }

    pub fn cancel_ride_intent(
        &self,
        req: &CancelRideIntentRequest,
    ) -> Result<CancelRideIntentResponse, ServiceError> {
        if req.rider_id.trim().is_empty() {
            return Err(ServiceError::InvalidArgument("rider_id cannot be blank".into()));
        }
        if req.station_area_id.trim().is_empty() {
            return Err(ServiceError::InvalidArgument("station_area_id cannot be blank".into()));
        }

        // Idempotent: cancelling a non-existent intent is not an error
        let removed = self.intents.remove(&req.rider_id, &req.station_area_id);
        info!(
            rider_id = %req.rider_id,
            station = %req.station_area_id,
            removed = removed,
            "rider_intent_cancelled"
        );
        let msg = if removed > 0 { "intent cancelled" } else { "no pending intent" };
        Ok(CancelRideIntentResponse { success: true, msg: msg.to_string() })
    }

    async fn run_match(&self, req: &EvaluateDriverRequest) -> MatchResponse {
        if req.seats_available <= 0 {
            return MatchResponse::unmatched("No seats available");
        }

        let pickup_by = req.driver_last_update
            + Duration::minutes(req.eta_to_station_minutes)
            + self.pickup_grace;

        let claimed = self.intents.take_matching(
            &req.station_area_id,
            &req.destination_area_id,
            req.seats_available as u32,
            pickup_by,
            req.driver_last_update,
        );

        if claimed.is_empty() {
            self.metrics.record_empty_round();
            return MatchResponse::unmatched("No matching riders");
        }

        let rider_ids: Vec<String> = claimed.iter().map(|i| i.rider_id.clone()).collect();
        let trip_id = self.create_trip(req, &rider_ids).await;
        self.metrics.record_match(rider_ids.len() as u64);

        info!(
            driver_id = %req.driver_id,
            station = %req.station_area_id,
            riders = rider_ids.len(),
            trip_id = %trip_id,
            "riders_matched"
        );

        self.notify_parties(req, &trip_id, &rider_ids).await;

        let result = MatchResult {
            trip_id,
            driver_id: req.driver_id.clone(),
            station_area_id: req.station_area_id.clone(),
            destination_area_id: req.destination_area_id.clone(),
            rider_ids: rider_ids.clone(),
        };

        self.registry.broadcast(MatchEvent {
            event_id: short_id("evt", 8),
            station_area_id: req.station_area_id.clone(),
            result: Some(result.clone()),
        });

        MatchResponse {
            matched: true,
            results: vec![result],
            msg: format!("matched {} rider(s)", rider_ids.len()),
        }
    }

    /// Create the trip downstream. Failure leaves the trip id blank; the
    /// match itself still stands.
    async fn create_trip(&self, req: &EvaluateDriverRequest, rider_ids: &[String]) -> String {
        let trip_req = CreateTripRequest {
            driver_id: req.driver_id.clone(),
            route_id: req.route_id.clone(),
            station_area_id: req.station_area_id.clone(),
            destination_area_id: req.destination_area_id.clone(),
            rider_ids: rider_ids.to_vec(),
            scheduled_departure: req.driver_last_update
                + Duration::minutes(req.eta_to_station_minutes),
        };

        match self.trips.create_trip(&trip_req).await {
            Ok(trip) => trip.trip_id,
            Err(e) => {
                self.metrics.record_trip_failure();
                warn!(driver_id = %req.driver_id, error = %e, "trip_create_failed");
                String::new()
            }
        }
    }

    async fn notify_parties(&self, req: &EvaluateDriverRequest, trip_id: &str, rider_ids: &[String]) {
        let driver_note = Notification::new(
            &req.driver_id,
            "New Trip Assigned",
            &format!("Pick up {} rider(s) at {}", rider_ids.len(), req.station_area_id),
        )
        .with_meta("tripId", trip_id);

        if let Err(e) = self.notifier.push(driver_note).await {
            self.metrics.record_notify_failure();
            warn!(user_id = %req.driver_id, error = %e, "notify_failed");
        }

        for rider_id in rider_ids {
            let note = Notification::new(
                rider_id,
                "Ride Matched",
                &format!("Your shuttle arrives at {} shortly", req.station_area_id),
            )
            .with_meta("tripId", trip_id)
            .with_meta("driverId", &req.driver_id);

            if let Err(e) = self.notifier.push(note).await {
                self.metrics.record_notify_failure();
                warn!(user_id = %rider_id, error = %e, "notify_failed");
            }
        }
    }
}

#[async_trait]
impl Matcher for MatchCoordinator {
    async fn evaluate_driver(&self, req: EvaluateDriverRequest) -> MatchResponse {
        self.run_match(&req).await
    }
}
