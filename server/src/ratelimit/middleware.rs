//! Axum middleware for admission control.
//!
//! Thin adapter between an axum request and [`AdmissionGate::check`]: it
//! builds the [`RequestContext`], asks the gate, and turns a denial into a
//! `429 Too Many Requests` response.
//!
//! [`AdmissionGate::check`]: crate::ratelimit::AdmissionGate::check

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::api::AppState;
use crate::ratelimit::{AccountId, NormalizedIp, RateLimitError, RequestContext};

/// Middleware that admits or rejects each request through the gate.
///
/// # Usage
///
/// ```ignore
/// use axum::middleware::from_fn_with_state;
///
/// Router::new()
///     .route("/api/status", get(status))
///     .layer(from_fn_with_state(state.clone(), admission_control))
/// ```
///
/// # Behavior
///
/// - If no gate is configured (`state.gate` is `None`), requests pass through.
/// - If the shared store is unavailable, the gate's failure policy decides;
///   this middleware never fails for that reason.
/// - If the limit is exceeded, returns `429 Too Many Requests` with a
///   `Retry-After` header.
/// - Stores `NormalizedIp` in request extensions for downstream handlers.
#[tracing::instrument(skip_all)]
pub async fn admission_control(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, RateLimitError> {
    let Some(ref gate) = state.gate else {
        return Ok(next.run(request).await);
    };

    // Present only when served with `into_make_service_with_connect_info`.
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);

    let mut ctx = RequestContext::resolve(
        request.headers(),
        peer,
        gate.config().trust_proxy,
        request.uri().path(),
    );
    ctx.account_id = request
        .extensions()
        .get::<AccountId>()
        .map(|account| account.0.clone());

    request
        .extensions_mut()
        .insert(NormalizedIp(ctx.client_ip.clone()));

    let decision = gate.check(&ctx).await;
    if !decision.allowed {
        debug!(
            ip = %ctx.client_ip,
            retry_after = decision.retry_after_secs,
            "Request rejected by admission gate"
        );
        return Err(RateLimitError::LimitExceeded {
            retry_after: decision.retry_after_secs,
        });
    }

    Ok(next.run(request).await)
}
