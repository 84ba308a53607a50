//! Trip service - persisted trip records
//!
//! Trips are created by the match coordinator and queried by clients.
//! Creation pushes a best-effort "Trip Created" notification to the
//! driver and every rider. Storage is in-memory; the `TripClient` seam
//! is where a real backend would plug in.

use crate::domain::error::ServiceError;
use crate::domain::messages::CreateTripRequest;
use crate::domain::types::{short_id, Notification, Trip};
use crate::services::coordinator::{NotifyClient, TripClient};
use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub const TRIP_SCHEDULED: &str = "scheduled";
pub const TRIP_CANCELLED: &str = "cancelled";
pub const TRIP_COMPLETED: &str = "completed";

pub struct TripService {
    trips: RwLock<FxHashMap<String, Trip>>,
    notifier: Arc<dyn NotifyClient>,
}

impl TripService {
    pub fn new(notifier: Arc<dyn NotifyClient>) -> Self {
        Self { trips: RwLock::new(FxHashMap::default()), notifier }
    }

    pub fn create(&self, req: &CreateTripRequest) -> Result<Trip, ServiceError> {
        if req.driver_id.trim().is_empty() {
            return Err(ServiceError::InvalidArgument("driver_id cannot be blank".into()));
        }
        if req.rider_ids.is_empty() {
            return Err(ServiceError::InvalidArgument("trip requires at least one rider".into()));
        }

        let trip = Trip {
            trip_id: short_id("trip", 8),
            driver_id: req.driver_id.clone(),
            route_id: req.route_id.clone(),
            station_area_id: req.station_area_id.clone(),
            destination_area_id: req.destination_area_id.clone(),
            rider_ids: req.rider_ids.clone(),
            scheduled_departure: req.scheduled_departure,
            status: TRIP_SCHEDULED.to_string(),
        };

        self.trips.write().insert(trip.trip_id.clone(), trip.clone());
        info!(trip_id = %trip.trip_id, driver_id = %trip.driver_id, riders = trip.rider_ids.len(), "trip_created");
        Ok(trip)
    }

    pub fn get(&self, trip_id: &str) -> Result<Trip, ServiceError> {
        self.trips
            .read()
            .get(trip_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("trip {}", trip_id)))
    }

    pub fn set_status(&self, trip_id: &str, status: &str) -> Result<Trip, ServiceError> {
        let mut trips = self.trips.write();
        let trip = trips
            .get_mut(trip_id)
            .ok_or_else(|| ServiceError::NotFound(format!("trip {}", trip_id)))?;
        trip.status = status.to_string();
        info!(trip_id = %trip_id, status = %status, "trip_status_changed");
        Ok(trip.clone())
    }

    pub fn list_for_driver(&self, driver_id: &str) -> Vec<Trip> {
        let mut trips: Vec<Trip> = self
            .trips
            .read()
            .values()
            .filter(|t| t.driver_id == driver_id)
            .cloned()
            .collect();
        trips.sort_by(|a, b| a.scheduled_departure.cmp(&b.scheduled_departure));
        trips
    }

    /// Ride history for one rider, oldest first
    pub fn list_for_rider(&self, rider_id: &str) -> Vec<Trip> {
        let mut trips: Vec<Trip> = self
            .trips
            .read()
            .values()
            .filter(|t| t.rider_ids.iter().any(|r| r == rider_id))
            .cloned()
            .collect();
        trips.sort_by(|a, b| a.scheduled_departure.cmp(&b.scheduled_departure));
        trips
    }

    // Failures are logged only; the trip already exists either way
    async fn notify_created(&self, trip: &Trip) {
        let driver_note = Notification::new(
            &trip.driver_id,
            "Trip Created",
            &format!("Trip {} has been created", trip.trip_id),
        )
        .with_meta("tripId", &trip.trip_id);
        if let Err(e) = self.notifier.push(driver_note).await {
            warn!(user_id = %trip.driver_id, error = %e, "trip_notify_failed");
        }

        for rider_id in &trip.rider_ids {
            let note = Notification::new(
                rider_id,
                "Trip Created",
                &format!("Your trip {} is confirmed", trip.trip_id),
            )
            .with_meta("tripId", &trip.trip_id);
            if let Err(e) = self.notifier.push(note).await {
                warn!(user_id = %rider_id, error = %e, "trip_notify_failed");
            }
        }
    }
}

#[async_trait]
impl TripClient for TripService {
    async fn create_trip(&self, req: &CreateTripRequest) -> Result<Trip, ServiceError> {
        let trip = self.create(req)?;
        self.notify_created(&trip).await;
        Ok(trip)
    }
}
