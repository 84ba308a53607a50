//! HTTP/JSON API
//!
//! One hyper http1 server carries the whole surface: telemetry ingest,
//! matching, rider intents, the NDJSON subscribe stream, CRUD around
//! drivers/areas/trips/users, health, and Prometheus metrics.

use crate::domain::error::ServiceError;
use crate::domain::messages::{
    AddEdgeRequest, AddRiderIntentRequest, CancelRideIntentRequest, EvaluateDriverRequest,
    RegisterDriverRequest, RegisterRouteRequest, RegisterUserRequest,
};
use crate::domain::types::{Area, DriverTelemetry, MatchEvent};
use crate::infra::metrics::{
    Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS,
};
use crate::services::{
    AreaTopology, DriverDirectory, MatchCoordinator, NotificationService, RoutePlanCache,
    SubscriptionRegistry, TelemetryEvaluator, TelemetryIngest, TripService, UserDirectory,
};
use bytes::Bytes;
use futures_util::stream;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

type ApiBody = BoxBody<Bytes, Infallible>;

/// Everything a request handler can reach
pub struct AppState {
    pub site_id: String,
    pub ingest: Arc<TelemetryIngest>,
    pub evaluator: Arc<TelemetryEvaluator>,
    pub coordinator: Arc<MatchCoordinator>,
    pub registry: Arc<SubscriptionRegistry>,
    pub route_cache: Arc<RoutePlanCache>,
    pub drivers: Arc<DriverDirectory>,
    pub topology: Arc<AreaTopology>,
    pub trips: Arc<TripService>,
    pub notifications: Arc<NotificationService>,
    pub users: Arc<UserDirectory>,
    pub metrics: Arc<Metrics>,
}

fn full(body: impl Into<Bytes>) -> ApiBody {
    Full::new(body.into()).boxed()
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<ApiBody> {
    let body = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(full(body))
        .expect("static response should not fail")
}

fn error_response(e: &ServiceError) -> Response<ApiBody> {
    let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = format!(r#"{{"error":{}}}"#, serde_json::to_string(&e.to_string()).unwrap_or_default());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(full(body))
        .expect("static response should not fail")
}

fn not_found() -> Response<ApiBody> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(full("Not Found"))
        .expect("static response should not fail")
}

async fn read_json<T: DeserializeOwned>(
    req: Request<hyper::body::Incoming>,
) -> Result<T, ServiceError> {
    let bytes = req
        .into_body()
        .collect()
        .await
        .map_err(|e| ServiceError::InvalidArgument(format!("body read failed: {}", e)))?
        .to_bytes();
    serde_json::from_slice(&bytes)
        .map_err(|e| ServiceError::InvalidArgument(format!("invalid json: {}", e)))
}

/// Value of one query parameter, if present
fn query_param(req: &Request<hyper::body::Incoming>, name: &str) -> Option<String> {
    req.uri().query()?.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == name).then(|| v.to_string())
    })
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Result<Response<ApiBody>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let response = match (&method, segments.as_slice()) {
        (&Method::GET, ["health"]) => Response::builder()
            .status(StatusCode::OK)
            .body(full("ok"))
            .expect("static response should not fail"),

        (&Method::GET, ["metrics"]) => {
            let summary = state
                .metrics
                .report(state.evaluator.active_drivers(), state.registry.count());
            let body = format_prometheus_metrics(&summary, &state.site_id);
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(full(body))
                .expect("static response should not fail")
        }

        (&Method::POST, ["v1", "telemetry"]) => match read_json::<DriverTelemetry>(req).await {
            Ok(telemetry) => {
                state.ingest.submit(telemetry);
                json_response(StatusCode::ACCEPTED, &serde_json::json!({"accepted": true}))
            }
            Err(e) => error_response(&e),
        },

        (&Method::POST, ["v1", "matching", "evaluate"]) => {
            match read_json::<EvaluateDriverRequest>(req).await {
                Ok(eval) => {
                    use crate::services::Matcher;
                    let resp = state.coordinator.evaluate_driver(eval).await;
                    json_response(StatusCode::OK, &resp)
                }
                Err(e) => error_response(&e),
            }
        }

        (&Method::GET, ["v1", "matching", "subscribe"]) => {
            let client_id = query_param(&req, "client_id");
            let stations: Vec<String> = query_param(&req, "stations")
                .map(|s| s.split(',').filter(|p| !p.is_empty()).map(str::to_string).collect())
                .unwrap_or_default();
            subscribe_response(&state, client_id, stations)
        }

        (&Method::POST, ["v1", "riders", "intents"]) => {
            match read_json::<AddRiderIntentRequest>(req).await {
                Ok(add) => match state.coordinator.add_rider_intent(&add) {
                    Ok(resp) => json_response(StatusCode::OK, &resp),
                    Err(e) => error_response(&e),
                },
                Err(e) => error_response(&e),
            }
        }

        (&Method::POST, ["v1", "riders", "intents", "cancel"]) => {
            match read_json::<CancelRideIntentRequest>(req).await {
                Ok(cancel) => match state.coordinator.cancel_ride_intent(&cancel) {
                    Ok(resp) => json_response(StatusCode::OK, &resp),
                    Err(e) => error_response(&e),
                },
                Err(e) => error_response(&e),
            }
        }

        (&Method::POST, ["v1", "users"]) => match read_json::<RegisterUserRequest>(req).await {
            Ok(reg) => match state.users.register(&reg) {
                Ok(session) => json_response(StatusCode::CREATED, &session),
                Err(e) => error_response(&e),
            },
            Err(e) => error_response(&e),
        },

        (&Method::POST, ["v1", "drivers"]) => {
            match read_json::<RegisterDriverRequest>(req).await {
                Ok(reg) => match state.drivers.register_driver(&reg) {
                    Ok(profile) => json_response(StatusCode::CREATED, &profile),
                    Err(e) => error_response(&e),
                },
                Err(e) => error_response(&e),
            }
        }

        (&Method::GET, ["v1", "drivers", driver_id]) => {
            match state.drivers.get_driver(driver_id) {
                Ok(profile) => json_response(StatusCode::OK, &profile),
                Err(e) => error_response(&e),
            }
        }

        (&Method::POST, ["v1", "drivers", driver_id, "routes"]) => {
            let driver_id = driver_id.to_string();
            match read_json::<RegisterRouteRequest>(req).await {
                Ok(route) => match state.drivers.register_route(&driver_id, &route) {
                    Ok(plan) => json_response(StatusCode::CREATED, &plan),
                    Err(e) => error_response(&e),
                },
                Err(e) => error_response(&e),
            }
        }

        (&Method::PUT, ["v1", "drivers", driver_id, "routes", route_id]) => {
            let driver_id = driver_id.to_string();
            let route_id = route_id.to_string();
            match read_json::<RegisterRouteRequest>(req).await {
                Ok(route) => match state.drivers.update_route(&driver_id, &route_id, &route) {
                    Ok(plan) => {
                        // The next resolve must see the replacement
                        state.route_cache.invalidate(&route_id);
                        json_response(StatusCode::OK, &plan)
                    }
                    Err(e) => error_response(&e),
                },
                Err(e) => error_response(&e),
            }
        }

        (&Method::GET, ["v1", "drivers", driver_id, "eta"]) => {
            let station = query_param(&req, "station").unwrap_or_default();
            if station.is_empty() {
                error_response(&ServiceError::InvalidArgument(
                    "station query parameter required".into(),
                ))
            } else {
                let eta = state.evaluator.driver_eta(driver_id, &station).await;
                json_response(StatusCode::OK, &eta)
            }
        }

        (&Method::GET, ["v1", "areas"]) => json_response(StatusCode::OK, &state.topology.list()),

        (&Method::POST, ["v1", "areas"]) => match read_json::<Area>(req).await {
            Ok(area) => {
                state.topology.upsert_area(area);
                json_response(StatusCode::CREATED, &serde_json::json!({"success": true}))
            }
            Err(e) => error_response(&e),
        },

        (&Method::POST, ["v1", "areas", "edges"]) => match read_json::<AddEdgeRequest>(req).await {
            Ok(edge) => match state.topology.add_edge(
                &edge.from_area_id,
                crate::domain::types::AreaEdge {
                    to_area_id: edge.to_area_id,
                    travel_minutes: edge.travel_minutes,
                },
            ) {
                Ok(()) => json_response(StatusCode::CREATED, &serde_json::json!({"success": true})),
                Err(e) => error_response(&e),
            },
            Err(e) => error_response(&e),
        },

        (&Method::GET, ["v1", "trips"]) => {
            if let Some(driver_id) = query_param(&req, "driver_id") {
                json_response(StatusCode::OK, &state.trips.list_for_driver(&driver_id))
            } else if let Some(rider_id) = query_param(&req, "rider_id") {
                json_response(StatusCode::OK, &state.trips.list_for_rider(&rider_id))
            } else {
                error_response(&ServiceError::InvalidArgument(
                    "driver_id or rider_id query parameter required".into(),
                ))
            }
        }

        (&Method::GET, ["v1", "trips", trip_id]) => match state.trips.get(trip_id) {
            Ok(trip) => json_response(StatusCode::OK, &trip),
            Err(e) => error_response(&e),
        },

        (&Method::GET, ["v1", "notifications"]) => {
            match query_param(&req, "user_id") {
                Some(user_id) if !user_id.is_empty() => {
                    json_response(StatusCode::OK, &state.notifications.list_for_user(&user_id))
                }
                _ => error_response(&ServiceError::InvalidArgument(
                    "user_id query parameter required".into(),
                )),
            }
        }

        _ => not_found(),
    };

    Ok(response)
}

/// Long-lived NDJSON stream of match events. Each line is one event; the
/// first line is the welcome marker. The subscriber is retired by the
/// registry once the client disconnects and the channel closes.
fn subscribe_response(
    state: &AppState,
    client_id: Option<String>,
    stations: Vec<String>,
) -> Response<ApiBody> {
    let (subscriber_id, rx) = state.registry.subscribe(client_id, stations);
    info!(subscriber_id = %subscriber_id, "subscribe_stream_opened");

    let stream = stream::unfold(rx, |mut rx| async move {
        let event: MatchEvent = rx.recv().await?;
        let mut line = serde_json::to_string(&event).unwrap_or_default();
        line.push('\n');
        Some((Ok::<_, Infallible>(Frame::data(Bytes::from(line))), rx))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/x-ndjson")
        .body(StreamBody::new(stream).boxed())
        .expect("static response should not fail")
}

enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, site: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {}", avg * count);
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format a metrics snapshot in Prometheus text exposition format
fn format_prometheus_metrics(summary: &MetricsSummary, site: &str) -> String {
    let mut out = String::with_capacity(4096);

    write_metric(
        &mut out,
        "lastmile_telemetry_total",
        "Telemetry messages processed",
        MetricType::Counter,
        site,
        summary.telemetry_total,
    );
    write_metric(
        &mut out,
        "lastmile_telemetry_dropped_total",
        "Telemetry messages dropped on full lanes",
        MetricType::Counter,
        site,
        summary.telemetry_dropped,
    );
    write_histogram(
        &mut out,
        "lastmile_telemetry_latency_us",
        "Telemetry processing latency in microseconds",
        site,
        &summary.latency_buckets,
        summary.avg_process_latency_us,
    );
    write_metric(
        &mut out,
        "lastmile_triggers_total",
        "Match evaluations dispatched",
        MetricType::Counter,
        site,
        summary.triggers_total,
    );
    write_metric(
        &mut out,
        "lastmile_matches_total",
        "Evaluations that claimed riders",
        MetricType::Counter,
        site,
        summary.matches_total,
    );
    write_metric(
        &mut out,
        "lastmile_empty_rounds_total",
        "Evaluations with no qualifying riders",
        MetricType::Counter,
        site,
        summary.empty_rounds_total,
    );
    write_metric(
        &mut out,
        "lastmile_riders_claimed_total",
        "Riders claimed across all matches",
        MetricType::Counter,
        site,
        summary.riders_claimed_total,
    );
    write_metric(
        &mut out,
        "lastmile_intents_added_total",
        "Rider intents registered",
        MetricType::Counter,
        site,
        summary.intents_added_total,
    );
    write_metric(
        &mut out,
        "lastmile_intents_cancelled_total",
        "Rider intents cancelled",
        MetricType::Counter,
        site,
        summary.intents_cancelled_total,
    );
    write_metric(
        &mut out,
        "lastmile_intents_expired_total",
        "Rider intents evicted unclaimed",
        MetricType::Counter,
        site,
        summary.intents_expired_total,
    );
    write_metric(
        &mut out,
        "lastmile_trip_failures_total",
        "Trip creations that failed downstream",
        MetricType::Counter,
        site,
        summary.trip_failures_total,
    );
    write_metric(
        &mut out,
        "lastmile_notify_failures_total",
        "Notification deliveries that failed",
        MetricType::Counter,
        site,
        summary.notify_failures_total,
    );
    write_metric(
        &mut out,
        "lastmile_broadcasts_total",
        "Match events broadcast to subscribers",
        MetricType::Counter,
        site,
        summary.broadcasts_total,
    );
    write_metric(
        &mut out,
        "lastmile_events_dropped_total",
        "Events dropped on full subscriber buffers",
        MetricType::Counter,
        site,
        summary.events_dropped_total,
    );
    write_metric(
        &mut out,
        "lastmile_subscribers_retired_total",
        "Subscribers retired after closed channels",
        MetricType::Counter,
        site,
        summary.subscribers_retired_total,
    );
    write_metric(
        &mut out,
        "lastmile_route_fetches_total",
        "Route plan fetches from the driver directory",
        MetricType::Counter,
        site,
        summary.route_fetches_total,
    );
    write_metric(
        &mut out,
        "lastmile_active_drivers",
        "Drivers with a telemetry snapshot",
        MetricType::Gauge,
        site,
        summary.active_drivers as u64,
    );
    write_metric(
        &mut out,
        "lastmile_subscribers",
        "Currently connected match subscribers",
        MetricType::Gauge,
        site,
        summary.subscribers as u64,
    );

    out
}

/// Run the API server until shutdown is signalled
pub async fn start_api_server(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, site = %state.site_id, "api_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "api_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "api_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("api_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_telemetry_processed(150);
        metrics.record_trigger();
        metrics.record_match(2);

        let summary = metrics.report(3, 1);
        let output = format_prometheus_metrics(&summary, "campus");

        assert!(output.contains("lastmile_telemetry_total{site=\"campus\"} 1"));
        assert!(output.contains("lastmile_telemetry_latency_us_bucket{site=\"campus\""));
        assert!(output.contains("lastmile_riders_claimed_total{site=\"campus\"} 2"));
        assert!(output.contains("lastmile_active_drivers{site=\"campus\"} 3"));
        assert!(output.contains("lastmile_subscribers{site=\"campus\"} 1"));
    }
}
