//! Liveness endpoint.

use axum::Json;
use serde_json::{json, Value};

use crate::util::now_ms;

/// `GET /healthz` — liveness probe. No side effects, suitable for
/// load-balancer checks.
pub async fn healthz() -> Json<Value> {
    Json(json!({
        "ok": true,
        "ts": now_ms(),
    }))
}
