//! API Router and Application State
//!
//! Central routing configuration and shared state. Every route under `/api`
//! is admitted through the gate; `/health` never is.

use axum::{extract::State, middleware::from_fn_with_state, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::{
    config::Config,
    ratelimit::{admission_control, AdmissionGate},
    store::TopologySelector,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// Shared store selector (owns the process-wide Redis client)
    pub store: TopologySelector,
    /// Admission gate (optional, disabled by configuration)
    pub gate: Option<AdmissionGate>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(config: Config, store: TopologySelector, gate: Option<AdmissionGate>) -> Self {
        Self {
            config: Arc::new(config),
            store,
            gate,
        }
    }

    /// Check if admission control is active.
    #[must_use]
    pub const fn has_gate(&self) -> bool {
        self.gate.is_some()
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/api/status", get(status))
        .layer(from_fn_with_state(state.clone(), admission_control));

    Router::new()
        .route("/health", get(health_check))
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    rate_limiting: bool,
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        rate_limiting: state.has_gate(),
    })
}

#[derive(Serialize)]
struct StatusResponse {
    version: &'static str,
    backend: &'static str,
    topology: Option<&'static str>,
}

/// Reports which backend is counting requests.
async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let topology = state.config.store.topology.as_ref().map(|t| t.kind());
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        backend: state.gate.as_ref().map_or("disabled", AdmissionGate::backend_name),
        topology,
    })
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http, http::StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::ratelimit::{LimitConfig, RateLimitConfig};

    async fn local_state(requests: u32) -> AppState {
        let selector = TopologySelector::unconfigured();
        let config = RateLimitConfig {
            limit: LimitConfig::per_secs(requests, 60),
            ..RateLimitConfig::default()
        };
        let gate = AdmissionGate::new(&selector, config).await;
        AppState::new(Config::default_for_test(), selector, Some(gate))
    }

    fn get_request(uri: &str) -> http::Request<Body> {
        http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_not_limited() {
        let app = create_router(local_state(1).await);
        for _ in 0..5 {
            let response = app.clone().oneshot(get_request("/health")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_status_is_limited() {
        let app = create_router(local_state(1).await);

        let response = app.clone().oneshot(get_request("/api/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(get_request("/api/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("retry-after"));
    }
}
