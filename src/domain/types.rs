//! Shared domain types for the last-mile gateway

use crate::domain::route::RoutePlan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Latest reported state of one driver. Upserted on every telemetry
/// message; only the newest state is kept, no history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverTelemetry {
    pub driver_id: String,
    /// Blank when the driver is not currently on a route
    #[serde(default)]
    pub route_id: String,
    pub current_area_id: String,
    pub occupancy: u32,
    pub ts: DateTime<Utc>,
}

/// A rider's standing request to be picked up at a station
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiderIntent {
    pub rider_id: String,
    pub station_area_id: String,
    pub destination_area_id: String,
    pub created_at: DateTime<Utc>,
    pub requested_arrival: DateTime<Utc>,
    pub party_size: u32,
}

/// Outcome of a successful match; published, never stored
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchResult {
    /// Empty when downstream trip creation failed
    #[serde(default)]
    pub trip_id: String,
    #[serde(default)]
    pub driver_id: String,
    pub station_area_id: String,
    pub destination_area_id: String,
    #[serde(default)]
    pub rider_ids: Vec<String>,
}

/// Event fanned out to match subscribers. A blank `station_area_id`
/// marks a global event delivered to every subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchEvent {
    pub event_id: String,
    #[serde(default)]
    pub station_area_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<MatchResult>,
}

/// An atomic location unit in the route topology
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Area {
    pub area_id: String,
    pub name: String,
    pub is_station: bool,
    #[serde(default)]
    pub neighbours: Vec<AreaEdge>,
}

/// Directed travel edge between two areas
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaEdge {
    pub to_area_id: String,
    pub travel_minutes: u32,
}

/// Driver profile as served by the driver directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverProfile {
    pub driver_id: String,
    pub user_id: String,
    pub vehicle_no: String,
    pub capacity: u32,
    #[serde(default)]
    pub routes: Vec<RoutePlan>,
}

/// Persisted trip record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub trip_id: String,
    pub driver_id: String,
    pub route_id: String,
    pub station_area_id: String,
    pub destination_area_id: String,
    pub rider_ids: Vec<String>,
    pub scheduled_departure: DateTime<Utc>,
    pub status: String,
}

/// Notification pushed to a user and kept for later retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(user_id: &str, title: &str, body: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Registered user profile (auth proper lives outside this gateway)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub display_name: String,
    /// "rider" or "driver"
    pub role: String,
    pub created_at: DateTime<Utc>,
}

/// Short random id with a prefix, e.g. `trip-0b9f3c21`.
/// Takes the trailing hex of a v7 uuid; the leading chars are the
/// timestamp and would collide across ids minted close together.
pub fn short_id(prefix: &str, len: usize) -> String {
    let id = uuid::Uuid::now_v7().simple().to_string();
    format!("{}-{}", prefix, &id[id.len() - len.min(id.len())..])
}
