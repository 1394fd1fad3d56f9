//! API route definitions.
//!
//! Read access to devices, anomalies, alerts, and statistics; write access
//! limited to alert acknowledgment and incident resolution.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use super::state::AppState;

pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/devices", get(list_devices))
        .route("/anomalies", get(list_anomalies))
        .route("/alerts", get(list_alerts))
        .route("/alerts/{id}/ack", post(acknowledge_alert))
        .route("/incidents/{key}/resolve", post(resolve_incident))
        .route("/scans/latest", get(latest_scan))
        .route("/baselines", get(list_baselines))
        .with_state(state)
}

fn envelope(data: Value) -> Json<Value> {
    Json(json!({
        "data": data,
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    envelope(json!({
        "status": "ok",
        "alerting_degraded": state.engine.is_degraded(),
    }))
}

#[derive(Deserialize)]
struct LimitParams {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    100
}

async fn list_devices(State(state): State<AppState>) -> Json<Value> {
    match state.store.known_devices() {
        Ok(devices) => {
            let total = devices.len();
            envelope(json!({ "devices": devices, "total": total }))
        }
        Err(e) => {
            warn!(error = %e, "device query failed");
            envelope(json!({ "devices": [], "total": 0 }))
        }
    }
}

async fn list_anomalies(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Json<Value> {
    match state.store.recent_anomalies(params.limit) {
        Ok(anomalies) => {
            let total = anomalies.len();
            envelope(json!({ "anomalies": anomalies, "total": total }))
        }
        Err(e) => {
            warn!(error = %e, "anomaly query failed");
            envelope(json!({ "anomalies": [], "total": 0 }))
        }
    }
}

async fn list_alerts(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Json<Value> {
    match state.store.recent_alerts(params.limit) {
        Ok(alerts) => {
            let total = alerts.len();
            envelope(json!({ "alerts": alerts, "total": total }))
        }
        Err(e) => {
            warn!(error = %e, "alert query failed");
            envelope(json!({ "alerts": [], "total": 0 }))
        }
    }
}

#[derive(Deserialize)]
struct AckBody {
    actor: String,
}

async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AckBody>,
) -> (StatusCode, Json<Value>) {
    if state.engine.acknowledge(&id, &body.actor) {
        (StatusCode::OK, envelope(json!({ "acknowledged": true })))
    } else {
        (
            StatusCode::NOT_FOUND,
            envelope(json!({ "acknowledged": false })),
        )
    }
}

async fn resolve_incident(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> (StatusCode, Json<Value>) {
    if state.engine.resolve(&key) {
        (StatusCode::OK, envelope(json!({ "resolved": true })))
    } else {
        (
            StatusCode::NOT_FOUND,
            envelope(json!({ "resolved": false })),
        )
    }
}

async fn latest_scan(State(state): State<AppState>) -> Json<Value> {
    match state.store.latest_scan_summary() {
        Ok(Some(scan)) => {
            let summary: Value =
                serde_json::from_str(&scan.summary_json).unwrap_or(Value::Null);
            envelope(json!({
                "scan_id": scan.scan_id,
                "subnet": scan.subnet,
                "summary": summary,
                "processed_at": scan.processed_at,
            }))
        }
        Ok(None) => envelope(Value::Null),
        Err(e) => {
            warn!(error = %e, "scan query failed");
            envelope(Value::Null)
        }
    }
}

async fn list_baselines(State(state): State<AppState>) -> Json<Value> {
    match state.store.baseline_states() {
        Ok(baselines) => {
            let total = baselines.len();
            envelope(json!({ "baselines": baselines, "total": total }))
        }
        Err(e) => {
            warn!(error = %e, "baseline query failed");
            envelope(json!({ "baselines": [], "total": 0 }))
        }
    }
}
