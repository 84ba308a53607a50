//! Domain models - core business types for shuttle matching
//!
//! This module contains the canonical data types used throughout the system:
//! - `RoutePlan` / `RouteStop` - a driver's registered route
//! - `RiderIntent` - a rider waiting at a station
//! - `DriverTelemetry` - latest reported driver state
//! - `MatchResult` / `MatchEvent` - match outcomes and fan-out events
//! - request/response messages for the API surface

pub mod error;
pub mod messages;
pub mod route;
pub mod types;
