//! Liveness probe.

use axum::Json;
use serde_json::json;

/// `GET /healthz` — public, unmetered.
pub async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
