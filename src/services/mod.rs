//! Business logic for the last-mile matching gateway
//!
//! - `telemetry` - snapshot upkeep, debounce, and match triggering
//! - `coordinator` - rider claims, trip creation, and fan-out
//! - `intent_store` - per-station rider queues with atomic claims
//! - `route_cache` - TTL cache over the driver directory
//! - `subscriptions` - match event subscriber registry
//! - `drivers` / `stations` / `trips` / `notifications` / `users` - CRUD
//!   collaborators around the matching core

pub mod coordinator;
pub mod drivers;
pub mod intent_store;
pub mod notifications;
pub mod route_cache;
pub mod stations;
pub mod subscriptions;
pub mod telemetry;
pub mod trips;
pub mod users;

pub use coordinator::{MatchCoordinator, Matcher, NotifyClient, TripClient};
pub use drivers::DriverDirectory;
pub use intent_store::RiderIntentStore;
pub use notifications::NotificationService;
pub use route_cache::{DriverLookup, RoutePlanCache};
pub use stations::AreaTopology;
pub use subscriptions::SubscriptionRegistry;
pub use telemetry::{TelemetryEvaluator, TelemetryIngest};
pub use trips::TripService;
pub use users::UserDirectory;
