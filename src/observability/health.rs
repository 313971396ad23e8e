//! Health check HTTP server
//!
//! Exposes the live data service to operators and orchestrators:
//!
//! - `GET /health` - overall status with per-check detail (503 unless healthy)
//! - `GET /ready` - readiness, true while the broker link is up
//! - `GET /live` - liveness, always true while the process serves requests
//! - `GET /metrics` - full metrics snapshot
//! - `GET /state` - current [`crate::model::LiveState`]

use crate::observability::metrics::metrics;
use crate::service::LiveDataService;
use crate::supervisor::HealthMetrics;
use crate::transport::ConnectionState;
use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

/// HTTP health check server
pub struct HealthServer {
    port: u16,
    service: Arc<LiveDataService>,
}

impl HealthServer {
    pub fn new(port: u16, service: Arc<LiveDataService>) -> Self {
        Self { port, service }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// All routes, without binding a socket
    pub fn routes(&self) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let health = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .and(with_service(self.service.clone()))
            .and_then(health_handler);

        let ready = warp::path("ready")
            .and(warp::path::end())
            .and(warp::get())
            .and(with_service(self.service.clone()))
            .and_then(ready_handler);

        let live = warp::path("live")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| {
                warp::reply::json(&LivenessResponse {
                    alive: true,
                    timestamp: current_timestamp(),
                })
            });

        let metrics_route = warp::path("metrics")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| warp::reply::json(&metrics().get_metrics()));

        let state = warp::path("state")
            .and(warp::path::end())
            .and(warp::get())
            .and(with_service(self.service.clone()))
            .map(|service: Arc<LiveDataService>| warp::reply::json(&service.live_state()));

        let root = warp::path::end().and(warp::get()).map(|| {
            let endpoints: BTreeMap<&str, &str> = [
                ("/health", "Overall health status with detailed checks"),
                ("/ready", "Readiness probe, true while the broker link is up"),
                ("/live", "Liveness probe"),
                ("/metrics", "Feed, subscription, connection and command counters"),
                ("/state", "Latest known state of the subscribed device"),
            ]
            .into_iter()
            .collect();
            warp::reply::json(&endpoints)
        });

        health
            .or(ready)
            .or(live)
            .or(metrics_route)
            .or(state)
            .or(root)
            .with(warp::cors().allow_any_origin())
    }

    /// Serve until the task is dropped
    pub async fn start(self: Arc<Self>) {
        tracing::info!(port = self.port, "Starting health server");
        warp::serve(self.routes()).run(([0, 0, 0, 0], self.port)).await;
    }
}

fn with_service(
    service: Arc<LiveDataService>,
) -> impl Filter<Extract = (Arc<LiveDataService>,), Error = Infallible> + Clone {
    warp::any().map(move || service.clone())
}

async fn health_handler(service: Arc<LiveDataService>) -> Result<impl Reply, Infallible> {
    let health = service.health_metrics().await.ok();
    let status = build_health_status(
        service.connection_state(),
        health.as_ref(),
        service.degraded_reason(),
        current_timestamp(),
    );
    let code = if status.status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok(warp::reply::with_status(warp::reply::json(&status), code))
}

async fn ready_handler(service: Arc<LiveDataService>) -> Result<impl Reply, Infallible> {
    let ready = service.connection_state().is_connected();
    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok(warp::reply::with_status(
        warp::reply::json(&ReadinessResponse {
            ready,
            timestamp: current_timestamp(),
        }),
        code,
    ))
}

/// Combine connection state and link metrics into one status document
pub fn build_health_status(
    state: ConnectionState,
    health: Option<&HealthMetrics>,
    degraded_reason: Option<String>,
    now: u64,
) -> HealthStatus {
    let mut checks = BTreeMap::new();

    let connection = match state {
        ConnectionState::Connected => HealthCheck::healthy("Broker link established", now),
        ConnectionState::Degraded => HealthCheck::new(
            "degraded",
            degraded_reason.unwrap_or_else(|| "Reconnection abandoned".to_string()),
            now,
        ),
        other => HealthCheck::new("unhealthy", format!("Broker link {other}"), now),
    };
    checks.insert("connection".to_string(), connection);

    let feed = match health {
        Some(h) if h.is_healthy => HealthCheck::healthy("Live feed active", now),
        Some(h) => match h.time_since_last_frame {
            Some(idle) => HealthCheck::new(
                "stale",
                format!("No frames for {} seconds", idle.as_secs()),
                now,
            ),
            None => HealthCheck::new("unhealthy", "No live feed", now),
        },
        None => HealthCheck::new("unknown", "Service not running", now),
    };
    checks.insert("feed".to_string(), feed);

    let overall = if checks.values().all(|c| c.status == "healthy") {
        "healthy"
    } else if state == ConnectionState::Degraded {
        "degraded"
    } else {
        "unhealthy"
    };

    HealthStatus {
        status: overall.to_string(),
        timestamp: now,
        connection_state: state,
        link: health.cloned(),
        checks,
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthCheck {
    pub status: String,
    pub message: Option<String>,
    pub last_check: u64,
}

impl HealthCheck {
    fn new(status: &str, message: impl Into<String>, now: u64) -> Self {
        Self {
            status: status.to_string(),
            message: Some(message.into()),
            last_check: now,
        }
    }

    fn healthy(message: &str, now: u64) -> Self {
        Self::new("healthy", message, now)
    }
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub connection_state: ConnectionState,
    pub link: Option<HealthMetrics>,
    pub checks: BTreeMap<String, HealthCheck>,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
