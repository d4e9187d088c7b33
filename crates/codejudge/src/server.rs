//! HTTP service
//!
//! `POST /execute` judges a submission, `GET /health` reports liveness.

use std::future::Future;
use std::io;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::judge::{Engine, JudgeError, JudgeRequest};
use crate::report::{ErrorBody, ExecuteResponse};

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    capacity: usize,
    available: usize,
    queued: usize,
    languages: Vec<String>,
}

/// Build the router serving `engine`
pub fn router(engine: Engine) -> Router {
    let body_limit = engine.config().server.max_body_bytes;

    Router::new()
        .route("/execute", post(execute_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// Serve on the configured address until `shutdown` resolves.
///
/// On shutdown the worker pool is closed, so queued submissions are turned
/// away while running ones finish.
pub async fn serve(
    engine: Engine,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> io::Result<()> {
    let listener = TcpListener::bind(engine.config().server.bind).await?;
    info!(addr = %listener.local_addr()?, "listening");

    let pool = engine.pool().clone();
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("shutting down");
            pool.close();
        })
        .await
}

async fn execute_handler(
    State(engine): State<Engine>,
    payload: Result<Json<JudgeRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!(error = %rejection, "rejected request body");
            return rejection_response(rejection);
        }
    };

    // Dropping this handler (client gone) cancels the submission
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let judging = tokio::spawn(async move { engine.judge(request, cancel).await });
    match judging.await {
        Ok(Ok(result)) => Json(ExecuteResponse::from(result)).into_response(),
        Ok(Err(e)) => e.into_response(),
        Err(e) => {
            error!(error = %e, "judge task panicked");
            JudgeError::internal("judge task failed", e).into_response()
        }
    }
}

fn rejection_response(rejection: JsonRejection) -> Response {
    let status = match rejection.status() {
        StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
        _ => StatusCode::BAD_REQUEST,
    };
    (status, Json(ErrorBody::validation(rejection.body_text()))).into_response()
}

async fn health_handler(State(engine): State<Engine>) -> (StatusCode, Json<HealthResponse>) {
    let report = engine.health();
    let (code, status) = if report.healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    (
        code,
        Json(HealthResponse {
            status,
            capacity: report.pool.capacity,
            available: report.pool.available,
            queued: report.pool.queued,
            languages: report.languages,
        }),
    )
}
