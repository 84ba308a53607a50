//! Route plan cache with single-flight refresh
//!
//! Resolving a route on every telemetry message would hammer the driver
//! directory, so plans are cached with a freshness TTL. One directory
//! fetch returns the driver's capacity and all of their routes; the
//! cache repopulates every returned route, not just the requested one.
//! Seat capacity is cached per driver with no TTL and refreshed on the
//! same fetch.
//!
//! When an entry is missing or stale, exactly one resolver performs the
//! fetch; concurrent resolvers for the same driver wait on a per-driver
//! refresh lock and then re-read the entry. A failed fetch caches
//! nothing, so the next qualifying telemetry tick retries.

use crate::domain::error::ServiceError;
use crate::domain::route::RoutePlan;
use crate::infra::Metrics;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// What one driver directory fetch returns
pub struct DriverSnapshot {
    pub capacity: u32,
    pub routes: Vec<RoutePlan>,
}

/// Source of truth for route plans and driver capacity. Implemented by
/// the driver directory; mocked in tests.
#[async_trait]
pub trait DriverLookup: Send + Sync {
    async fn get_driver(&self, driver_id: &str) -> Result<DriverSnapshot, ServiceError>;
}

/// Cached view handed to resolvers
#[derive(Debug, Clone)]
pub struct CachedRoute {
    pub plan: RoutePlan,
    pub capacity: u32,
}

struct CacheEntry {
    plan: RoutePlan,
    fetched_at: Instant,
}

pub struct RoutePlanCache {
    lookup: Arc<dyn DriverLookup>,
    ttl: Duration,
    entries: parking_lot::RwLock<FxHashMap<String, CacheEntry>>,
    capacities: parking_lot::RwLock<FxHashMap<String, u32>>,
    // One refresh lock per driver id; holders fetch, waiters re-read
    refresh_locks: parking_lot::Mutex<FxHashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    metrics: Arc<Metrics>,
}

impl RoutePlanCache {
    pub fn new(lookup: Arc<dyn DriverLookup>, ttl: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            lookup,
            ttl,
            entries: parking_lot::RwLock::new(FxHashMap::default()),
            capacities: parking_lot::RwLock::new(FxHashMap::default()),
            refresh_locks: parking_lot::Mutex::new(FxHashMap::default()),
            metrics,
        }
    }

    /// Resolve a route plan and the driver's capacity, fetching from the
    /// directory when the cached entry is missing or older than the TTL.
    pub async fn resolve(
        &self,
        driver_id: &str,
        route_id: &str,
    ) -> Result<CachedRoute, ServiceError> {
        if let Some(cached) = self.fresh_entry(driver_id, route_id) {
            return Ok(cached);
        }

        let lock = self.refresh_lock(driver_id);
        let _guard = lock.lock().await;

        // Another resolver may have refreshed while we waited
        if let Some(cached) = self.fresh_entry(driver_id, route_id) {
            return Ok(cached);
        }

        debug!(driver_id = %driver_id, route_id = %route_id, "route_cache_refresh");
        self.metrics.record_route_fetch();
        let snapshot = self.lookup.get_driver(driver_id).await?;

        self.capacities.write().insert(driver_id.to_string(), snapshot.capacity);
        let mut requested = None;
        {
            let mut entries = self.entries.write();
            let now = Instant::now();
            for plan in snapshot.routes {
                if plan.route_id == route_id {
                    requested = Some(plan.clone());
                }
                entries.insert(plan.route_id.clone(), CacheEntry { plan, fetched_at: now });
            }
        }

        // Answer from the snapshot we just fetched; re-reading the cache
        // would apply the TTL to an entry that is zero seconds old
        requested
            .map(|plan| CachedRoute { plan, capacity: snapshot.capacity })
            .ok_or_else(|| ServiceError::NotFound(format!("route {}", route_id)))
    }

    /// Drop a cached route entry, forcing the next resolve to fetch
    pub fn invalidate(&self, route_id: &str) {
        self.entries.write().remove(route_id);
    }

    fn fresh_entry(&self, driver_id: &str, route_id: &str) -> Option<CachedRoute> {
        let capacity = *self.capacities.read().get(driver_id)?;
        let entries = self.entries.read();
        let entry = entries.get(route_id)?;
        if entry.fetched_at.elapsed() < self.ttl {
            Some(CachedRoute { plan: entry.plan.clone(), capacity })
        } else {
            None
        }
    }

    fn refresh_lock(&self, driver_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.refresh_locks.lock();
        locks.entry(driver_id.to_string()).or_default().clone()
    }
}
