//! HTTP front door.
//!
//! `/update` takes the webhook call through the [`AdmissionGate`] and runs the
//! replacement under the configured deadline. `/metrics` serves Prometheus
//! metrics and `/healthz` is a liveness probe.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use uuid::Uuid;

use crate::config::HotswapConfig;
use crate::replace::Replacer;

pub mod admission;
pub mod locks;
pub mod metrics;

pub use admission::AdmissionGate;
use locks::NameLocks;
use metrics::Metrics;

#[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq, Eq)]
pub struct UpdateResponse {
    #[serde(rename = "OK")]
    pub ok: bool,
}

/// State shared across axum handlers.
pub struct AppState {
    gate: AdmissionGate,
    replacer: Replacer,
    locks: NameLocks,
    metrics: Arc<Metrics>,
    request_timeout: Duration,
}

impl AppState {
    pub fn new(config: &HotswapConfig, replacer: Replacer, metrics: Arc<Metrics>) -> Self {
        Self {
            gate: AdmissionGate::new(config),
            replacer,
            locks: NameLocks::default(),
            metrics,
            request_timeout: config.request_timeout,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/update", any(update))
        .route("/metrics", get(export_metrics))
        .route("/healthz", get(healthz))
        .with_state(Arc::new(state))
}

pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn update(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let req = match state.gate.admit(&method, &headers, &body) {
        Ok(req) => req,
        Err(e) => {
            log::warn!("Rejected update request: {e}");
            state.metrics.observe_rejection(e.reason());
            return e.into_response();
        }
    };

    let request_id = Uuid::now_v7();
    log::info!(
        "[{request_id}] Update requested for {} to image {}",
        req.name,
        req.image
    );

    let deadline = tokio::time::Instant::now() + state.request_timeout;

    // A request still queued behind another replacement of the same container
    // when its deadline expires never reaches the engine
    let guard = match tokio::time::timeout_at(deadline, state.locks.lock(&req.name)).await {
        Ok(guard) => guard,
        Err(_) => {
            log::warn!(
                "[{request_id}] Update of {} expired while queued behind another update of it, nothing was changed",
                req.name
            );
            return deadline_exceeded(&state);
        }
    };

    // Once started, the replacement runs on its own task so that an expired
    // deadline only stops the waiting, never the sequence itself.
    let task = {
        let replacer = state.replacer.clone();
        let metrics = Arc::clone(&state.metrics);
        tokio::spawn(async move {
            let _guard = guard;
            let start = Instant::now();
            let result = replacer.replace(&req).await;
            let outcome = match &result {
                Ok(_) => "success",
                Err(e) => e.outcome(),
            };
            metrics.observe_replacement(outcome, start.elapsed());
            (req, result)
        })
    };

    match tokio::time::timeout_at(deadline, task).await {
        Ok(Ok((req, Ok(container_id)))) => {
            log::info!(
                "[{request_id}] Updated {} to image {} ({container_id})",
                req.name,
                req.image
            );
            (StatusCode::OK, Json(UpdateResponse { ok: true })).into_response()
        }
        Ok(Ok((req, Err(e)))) => {
            if e.stage().is_some_and(|stage| stage.is_safe()) {
                log::warn!("[{request_id}] Update of {} aborted, nothing was changed: {e}", req.name);
            } else {
                log::error!(
                    "[{request_id}] Update of {} failed (recovery performed: {}): {e}",
                    req.name,
                    e.recovery_performed()
                );
            }
            internal_error()
        }
        Ok(Err(e)) => {
            log::error!("[{request_id}] Update task failed: {e}");
            internal_error()
        }
        Err(_) => {
            log::error!(
                "[{request_id}] Update exceeded the {:?} deadline, it keeps running in the background",
                state.request_timeout
            );
            deadline_exceeded(&state)
        }
    }
}

fn deadline_exceeded(state: &AppState) -> Response {
    state.metrics.observe_timeout();
    (
        StatusCode::SERVICE_UNAVAILABLE,
        format!(
            "Exceeded configured timeout of {:?}.\n",
            state.request_timeout
        ),
    )
        .into_response()
}

fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
}

async fn export_metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.export() {
        Ok(text) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            text,
        )
            .into_response(),
        Err(e) => {
            log::error!("Failed to encode metrics: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}
