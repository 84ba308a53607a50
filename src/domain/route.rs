//! Route plans and stop validation
//!
//! A route plan is an ordered sequence of area stops with expected
//! arrival offsets, assigned to one driver. Plans are immutable once
//! registered; updates replace the whole stop list.

use crate::domain::error::ServiceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One stop on a route. Sequence numbers start at 0 and are unique per
/// route; arrival offsets are minutes from route start and never decrease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteStop {
    pub sequence: u32,
    pub area_id: String,
    pub is_station: bool,
    pub arrival_offset_minutes: i64,
}

/// A driver's registered route: ordered stops plus the final area the
/// shuttle terminates at (destination for every match on this route).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePlan {
    pub route_id: String,
    pub driver_id: String,
    pub final_area_id: String,
    pub created_at: DateTime<Utc>,
    pub stops: Vec<RouteStop>,
}

impl RoutePlan {
    /// Locate the stop matching an area id. Routes may visit the same
    /// area twice; the smallest sequence wins.
    pub fn stop_at_area(&self, area_id: &str) -> Option<&RouteStop> {
        self.stops
            .iter()
            .filter(|s| s.area_id == area_id)
            .min_by_key(|s| s.sequence)
    }
}

/// Unvalidated stop as submitted by a driver client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopDraft {
    pub area_id: String,
    #[serde(default)]
    pub is_station: bool,
    pub arrival_offset_minutes: i64,
}

/// Validate a submitted stop list and assign sequence numbers.
///
/// The whole list is rejected on the first violation; no partial route is
/// ever persisted. `area_exists` and `edge_exists` come from the area
/// topology store.
pub fn build_stops(
    drafts: &[StopDraft],
    area_exists: impl Fn(&str) -> bool,
    edge_exists: impl Fn(&str, &str) -> bool,
) -> Result<Vec<RouteStop>, ServiceError> {
    if drafts.is_empty() {
        return Err(ServiceError::InvalidArgument(
            "route must contain at least one stop".into(),
        ));
    }

    let mut stops = Vec::with_capacity(drafts.len());
    let mut contains_station = false;
    let mut prev_offset = -1i64;

    for (i, draft) in drafts.iter().enumerate() {
        if draft.area_id.trim().is_empty() {
            return Err(ServiceError::InvalidArgument(
                "stop area_id cannot be blank".into(),
            ));
        }
        if !area_exists(&draft.area_id) {
            return Err(ServiceError::InvalidArgument(format!(
                "unknown area_id: {}",
                draft.area_id
            )));
        }
        if draft.arrival_offset_minutes < 0 {
            return Err(ServiceError::InvalidArgument(
                "arrival_offset_minutes must be non-negative".into(),
            ));
        }
        if draft.arrival_offset_minutes < prev_offset {
            return Err(ServiceError::InvalidArgument(
                "arrival_offset_minutes must be non-decreasing".into(),
            ));
        }
        prev_offset = draft.arrival_offset_minutes;
        contains_station |= draft.is_station;

        stops.push(RouteStop {
            sequence: i as u32,
            area_id: draft.area_id.clone(),
            is_station: draft.is_station,
            arrival_offset_minutes: draft.arrival_offset_minutes,
        });
    }

    if !contains_station {
        return Err(ServiceError::InvalidArgument(
            "route requires at least one station stop".into(),
        ));
    }

    for pair in stops.windows(2) {
        if !edge_exists(&pair[0].area_id, &pair[1].area_id) {
            return Err(ServiceError::InvalidArgument(format!(
                "areas {} and {} are not connected",
                pair[0].area_id, pair[1].area_id
            )));
        }
    }

    Ok(stops)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(area: &str, station: bool, offset: i64) -> StopDraft {
        StopDraft {
            area_id: area.to_string(),
            is_station: station,
            arrival_offset_minutes: offset,
        }
    }

    fn any_area(_: &str) -> bool {
        true
    }

    fn any_edge(_: &str, _: &str) -> bool {
        true
    }

    #[test]
    fn test_build_stops_assigns_sequences() {
        let stops = build_stops(
            &[draft("A", false, 0), draft("B", true, 3), draft("C", false, 7)],
            any_area,
            any_edge,
        )
        .unwrap();

        assert_eq!(stops.len(), 3);
        assert_eq!(stops[0].sequence, 0);
        assert_eq!(stops[2].sequence, 2);
        assert!(stops[1].is_station);
    }

    #[test]
    fn test_build_stops_rejects_empty() {
        let err = build_stops(&[], any_area, any_edge).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));
    }

    #[test]
    fn test_build_stops_rejects_decreasing_offsets() {
        let err = build_stops(
            &[draft("A", true, 5), draft("B", false, 3)],
            any_area,
            any_edge,
        )
        .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));
    }

    #[test]
    fn test_build_stops_rejects_missing_station() {
        let err = build_stops(
            &[draft("A", false, 0), draft("B", false, 3)],
            any_area,
            any_edge,
        )
        .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));
    }

    #[test]
    fn test_build_stops_rejects_unknown_area() {
        let err = build_stops(&[draft("A", true, 0)], |_| false, any_edge).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));
    }

    #[test]
    fn test_build_stops_rejects_disconnected_areas() {
        let err = build_stops(
            &[draft("A", true, 0), draft("B", false, 2)],
            any_area,
            |_, _| false,
        )
        .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));
    }

    #[test]
    fn test_stop_at_area_smallest_sequence_wins() {
        let plan = RoutePlan {
            route_id: "r1".into(),
            driver_id: "d1".into(),
            final_area_id: "A".into(),
            created_at: Utc::now(),
            stops: vec![
                RouteStop {
                    sequence: 0,
                    area_id: "A".into(),
                    is_station: true,
                    arrival_offset_minutes: 0,
                },
                RouteStop {
                    sequence: 1,
                    area_id: "A".into(),
                    is_station: false,
                    arrival_offset_minutes: 9,
                },
            ],
        };

        assert_eq!(plan.stop_at_area("A").unwrap().sequence, 0);
        assert!(plan.stop_at_area("Z").is_none());
    }
}
