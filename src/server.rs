//! HTTP surface of the marking service.
//!
//! - `POST /scan-mark` `{code}` -> 200 on a fresh mark, 400 on a business
//!   rejection (not found, duplicate, store failure), 500 otherwise.
//! - `GET /stats`, `GET /logs?limit=N`, `GET /students`.
//!
//! The operator identity is resolved upstream and forwarded in the
//! `x-operator-id` / `x-operator-name` headers.
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::client::{OPERATOR_ID_HEADER, OPERATOR_NAME_HEADER};
use crate::marking::MarkingService;
use crate::model::Operator;

const DEFAULT_LOG_LIMIT: usize = 10;
const MAX_LOG_LIMIT: usize = 1000;

#[derive(Clone)]
pub struct AppState {
    pub marking: Arc<MarkingService>,
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    #[serde(default, alias = "qrId")]
    pub code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/scan-mark", post(scan_mark_handler))
        .route("/stats", get(stats_handler))
        .route("/logs", get(logs_handler))
        .route("/students", get(students_handler))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    axum::serve(listener, build_router(state)).await
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn internal_error() -> Response {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

/// Header values are read as UTF-8; `to_str` would reject non-ASCII names.
fn operator_from_headers(headers: &HeaderMap) -> Operator {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| std::str::from_utf8(v.as_bytes()).ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    Operator {
        id: header(OPERATOR_ID_HEADER).unwrap_or_else(|| "unknown".to_string()),
        name: header(OPERATOR_NAME_HEADER).unwrap_or_else(|| "Unknown Volunteer".to_string()),
    }
}

/// Clamp `?limit=`; missing or unparsable values use the default.
fn parse_limit(raw: Option<&str>) -> usize {
    raw.and_then(|v| v.trim().parse::<usize>().ok())
        .map_or(DEFAULT_LOG_LIMIT, |v| v.min(MAX_LOG_LIMIT))
}

async fn scan_mark_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ScanRequest>, JsonRejection>,
) -> Response {
    let code = match body {
        Ok(Json(req)) => req.code.filter(|c| !c.trim().is_empty()),
        Err(rejection) => {
            info!(%rejection, "rejected scan-mark body");
            None
        }
    };
    let Some(code) = code else {
        return error_response(StatusCode::BAD_REQUEST, "QR ID is required");
    };

    let operator = operator_from_headers(&headers);
    info!(route = "/scan-mark", code = %code, operator = %operator.id, "request start");
    let result = state.marking.mark_present(&code, &operator).await;
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(result)).into_response()
}

async fn stats_handler(State(state): State<AppState>) -> Response {
    match state.marking.stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(err) => {
            error!(?err, route = "/stats", "stats failed");
            internal_error()
        }
    }
}

async fn logs_handler(State(state): State<AppState>, Query(query): Query<LogsQuery>) -> Response {
    let limit = parse_limit(query.limit.as_deref());
    match state.marking.recent_logs(limit).await {
        Ok(logs) => Json(logs).into_response(),
        Err(err) => {
            error!(?err, route = "/logs", "log read failed");
            internal_error()
        }
    }
}

async fn students_handler(State(state): State<AppState>) -> Response {
    match state.marking.list_students().await {
        Ok(students) => Json(students).into_response(),
        Err(err) => {
            error!(?err, route = "/students", "roster read failed");
            internal_error()
        }
    }
}
