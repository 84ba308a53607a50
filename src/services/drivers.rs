//! Driver directory - driver profiles and registered routes
//!
//! Backs the route plan cache through the `DriverLookup` trait. Route
//! registration validates the submitted stop list against the area
//! topology before anything is persisted.

use crate::domain::error::ServiceError;
use crate::domain::messages::{RegisterDriverRequest, RegisterRouteRequest};
use crate::domain::route::{build_stops, RoutePlan};
use crate::domain::types::{short_id, DriverProfile};
use crate::services::route_cache::{DriverLookup, DriverSnapshot};
use crate::services::stations::AreaTopology;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::info;

pub struct DriverDirectory {
    topology: Arc<AreaTopology>,
    drivers: RwLock<FxHashMap<String, DriverProfile>>,
    // route_id -> plan, denormalized for O(1) lookup from the cache
    routes: RwLock<FxHashMap<String, RoutePlan>>,
}

impl DriverDirectory {
    pub fn new(topology: Arc<AreaTopology>) -> Self {
        Self {
            topology,
            drivers: RwLock::new(FxHashMap::default()),
            routes: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn register_driver(
        &self,
        req: &RegisterDriverRequest,
    ) -> Result<DriverProfile, ServiceError> {
        if req.user_id.trim().is_empty() {
            return Err(ServiceError::InvalidArgument("user_id cannot be blank".into()));
        }
        if req.capacity == 0 {
            return Err(ServiceError::InvalidArgument("capacity must be positive".into()));
        }

        let profile = DriverProfile {
            driver_id: short_id("driver", 8),
            user_id: req.user_id.clone(),
            vehicle_no: req.vehicle_no.clone(),
            capacity: req.capacity,
            routes: Vec::new(),
        };

        self.drivers.write().insert(profile.driver_id.clone(), profile.clone());
        info!(driver_id = %profile.driver_id, capacity = profile.capacity, "driver_registered");
        Ok(profile)
    }

    pub fn get_driver(&self, driver_id: &str) -> Result<DriverProfile, ServiceError> {
        self.drivers
            .read()
            .get(driver_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("driver {}", driver_id)))
    }

    /// Register a route for a driver. The whole stop list is validated
    /// first; the final stop's area becomes the route destination.
    pub fn register_route(
        &self,
        driver_id: &str,
        req: &RegisterRouteRequest,
    ) -> Result<RoutePlan, ServiceError> {
        let stops = build_stops(
            &req.stops,
            |area| self.topology.area_exists(area),
            |from, to| self.topology.edge_exists(from, to),
        )?;

        let final_area_id = stops
            .last()
            .map(|s| s.area_id.clone())
            .unwrap_or_default();

        let plan = RoutePlan {
            route_id: short_id("route", 8),
            driver_id: driver_id.to_string(),
            final_area_id,
            created_at: Utc::now(),
            stops,
        };

        {
            let mut drivers = self.drivers.write();
            let driver = drivers
                .get_mut(driver_id)
                .ok_or_else(|| ServiceError::NotFound(format!("driver {}", driver_id)))?;
            driver.routes.push(plan.clone());
        }
        self.routes.write().insert(plan.route_id.clone(), plan.clone());

        info!(
            driver_id = %driver_id,
            route_id = %plan.route_id,
            stops = plan.stops.len(),
            final_area = %plan.final_area_id,
            "route_registered"
        );
        Ok(plan)
    }

    /// Replace a route's stop list wholesale. The route must already
    /// belong to the driver; a validation failure leaves the stored
    /// plan untouched.
    pub fn update_route(
        &self,
        driver_id: &str,
        route_id: &str,
        req: &RegisterRouteRequest,
    ) -> Result<RoutePlan, ServiceError> {
        let stops = build_stops(
            &req.stops,
            |area| self.topology.area_exists(area),
            |from, to| self.topology.edge_exists(from, to),
        )?;
        let final_area_id = stops
            .last()
            .map(|s| s.area_id.clone())
            .unwrap_or_default();

        let plan = {
            let mut drivers = self.drivers.write();
            let driver = drivers
                .get_mut(driver_id)
                .ok_or_else(|| ServiceError::NotFound(format!("driver {}", driver_id)))?;
            let route = driver
                .routes
                .iter_mut()
                .find(|r| r.route_id == route_id)
                .ok_or_else(|| ServiceError::NotFound(format!("route {}", route_id)))?;
            route.stops = stops;
            route.final_area_id = final_area_id;
            route.clone()
        };
        self.routes.write().insert(plan.route_id.clone(), plan.clone());

        info!(
            driver_id = %driver_id,
            route_id = %route_id,
            stops = plan.stops.len(),
            final_area = %plan.final_area_id,
            "route_updated"
        );
        Ok(plan)
    }

    pub fn get_route(&self, route_id: &str) -> Result<RoutePlan, ServiceError> {
        self.routes
            .read()
            .get(route_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("route {}", route_id)))
    }

    pub fn driver_count(&self) -> usize {
        self.drivers.read().len()
    }
}

#[async_trait]
impl DriverLookup for DriverDirectory {
    async fn get_driver(&self, driver_id: &str) -> Result<DriverSnapshot, ServiceError> {
        let profile = DriverDirectory::get_driver(self, driver_id)?;
        Ok(DriverSnapshot { capacity: profile.capacity, routes: profile.routes })
    }
}
