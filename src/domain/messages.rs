//! Request/response payloads for the HTTP/JSON API
//!
//! Field names follow the wire contract consumed by driver and rider
//! clients; everything is plain JSON with RFC 3339 timestamps.

use crate::domain::route::StopDraft;
use crate::domain::types::MatchResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Asks the coordinator whether a driver approaching a station should be
/// matched with waiting riders. Normally produced by the telemetry
/// evaluator, but also accepted directly on the API for tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateDriverRequest {
    pub driver_id: String,
    pub route_id: String,
    pub station_area_id: String,
    pub driver_current_area_id: String,
    pub destination_area_id: String,
    pub seats_available: i32,
    pub eta_to_station_minutes: i64,
    pub driver_last_update: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResponse {
    pub matched: bool,
    #[serde(default)]
    pub results: Vec<MatchResult>,
    pub msg: String,
}

impl MatchResponse {
    pub fn unmatched(msg: &str) -> Self {
        Self {
            matched: false,
            results: Vec::new(),
            msg: msg.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddRiderIntentRequest {
    pub rider_id: String,
    pub station_area_id: String,
    #[serde(default)]
    pub destination_area_id: String,
    pub arrival_time: DateTime<Utc>,
    #[serde(default = "default_party_size")]
    pub party_size: u32,
}

fn default_party_size() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddRiderIntentResponse {
    pub success: bool,
    pub msg: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRideIntentRequest {
    pub rider_id: String,
    pub station_area_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRideIntentResponse {
    pub success: bool,
    pub msg: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDriverRequest {
    pub user_id: String,
    pub vehicle_no: String,
    pub capacity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRouteRequest {
    pub stops: Vec<StopDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTripRequest {
    pub driver_id: String,
    pub route_id: String,
    pub station_area_id: String,
    pub destination_area_id: String,
    pub rider_ids: Vec<String>,
    pub scheduled_departure: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddEdgeRequest {
    pub from_area_id: String,
    pub to_area_id: String,
    #[serde(default = "default_travel_minutes")]
    pub travel_minutes: u32,
}

fn default_travel_minutes() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterUserRequest {
    pub display_name: String,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    "rider".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub user_id: String,
    pub token: String,
}

/// ETA answer for a driver/station pair; `reachable` is false when the
/// driver has no telemetry, no resolvable plan, or already passed the
/// station.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverEta {
    pub driver_id: String,
    pub station_area_id: String,
    pub reachable: bool,
    #[serde(default)]
    pub eta_minutes: i64,
}
