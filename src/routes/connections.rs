//! REST endpoints for managed connections.
//!
//! - `POST   /connections`              — create a session (waits for Ready)
//! - `GET    /connections`              — full registry snapshot
//! - `DELETE /connections/{id}`         — terminate a session
//! - `POST   /connections/{id}/resize`  — change PTY dimensions

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::sessions::{CreateParams, Snapshot};
use crate::AppState;

/// Body of `POST /connections`. Everything optional at the wire level;
/// required fields are validated by the handler so violations map to 400
/// rather than a deserialization rejection.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBody {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub cols: Option<f64>,
    pub rows: Option<f64>,
    pub idle_timeout_ms: Option<f64>,
}

/// Body of `POST /connections/{id}/resize`.
#[derive(Deserialize)]
pub struct ResizeBody {
    pub cols: Option<f64>,
    pub rows: Option<f64>,
}

/// A requested dimension, or the configured default when absent or not a
/// usable finite number.
fn dim_or(requested: Option<f64>, default: u16) -> u16 {
    match requested {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Some(v) if v.is_finite() && v >= 1.0 => v as u16,
        _ => default,
    }
}

/// A requested idle budget, or the configured default when absent or not a
/// usable finite number.
fn idle_timeout_or(requested: Option<f64>, default: u64) -> u64 {
    match requested {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Some(v) if v.is_finite() && v >= 0.0 => v as u64,
        _ => default,
    }
}

fn required(field: Option<String>, name: &str) -> Result<String, ApiError> {
    field
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::InvalidRequest(format!("{name} is required")))
}

/// `POST /connections` — create a session. Responds 201 once the SSH
/// transport is up and the PTY shell is open.
pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let host = required(body.host, "host")?;
    let username = required(body.username, "username")?;
    let password = required(body.password, "password")?;

    let server = &state.config.server;
    let params = CreateParams {
        host,
        port: body.port.unwrap_or(22),
        username,
        password,
        cols: dim_or(body.cols, server.default_cols),
        rows: dim_or(body.rows, server.default_rows),
        idle_timeout_ms: idle_timeout_or(body.idle_timeout_ms, server.idle_timeout_ms),
    };

    let view = state.manager.create(params).await?;

    let ws_path = format!("{}/ws/{}", server.base_path, view.id);
    let mut response = serde_json::to_value(&view)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    response["wsPath"] = json!(ws_path);

    Ok((StatusCode::CREATED, Json(response)))
}

/// `GET /connections` — snapshot of all sessions.
pub async fn list(State(state): State<AppState>) -> Json<Snapshot> {
    Json(state.manager.snapshot().await)
}

/// `DELETE /connections/{id}` — terminate a session. 404 when unknown, with
/// no side effects or notifications.
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.manager.delete(&id).await {
        return Err(ApiError::NotFound(id));
    }
    Ok(Json(json!({ "ok": true })))
}

/// `POST /connections/{id}/resize` — change PTY dimensions. 400 when the
/// dimensions are missing or not finite; 404 when the session is unknown or
/// not Ready.
pub async fn resize(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ResizeBody>,
) -> Result<Json<Value>, ApiError> {
    let (Some(cols), Some(rows)) = (
        body.cols.filter(|v| v.is_finite()),
        body.rows.filter(|v| v.is_finite()),
    ) else {
        return Err(ApiError::InvalidRequest(
            "cols and rows must be finite numbers".into(),
        ));
    };

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (cols, rows) = (cols as u16, rows as u16);
    state.manager.resize(&id, cols, rows).await?;

    Ok(Json(json!({ "ok": true, "cols": cols, "rows": rows })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dims_fall_back_to_defaults() {
        assert_eq!(dim_or(None, 120), 120);
        assert_eq!(dim_or(Some(80.0), 120), 80);
        assert_eq!(dim_or(Some(0.0), 120), 120);
        assert_eq!(dim_or(Some(-5.0), 120), 120);
        assert_eq!(dim_or(Some(f64::NAN), 120), 120);
        assert_eq!(dim_or(Some(f64::INFINITY), 120), 120);
    }

    #[test]
    fn idle_timeout_falls_back_to_default() {
        assert_eq!(idle_timeout_or(None, 600_000), 600_000);
        assert_eq!(idle_timeout_or(Some(100.0), 600_000), 100);
        assert_eq!(idle_timeout_or(Some(0.0), 600_000), 0);
        assert_eq!(idle_timeout_or(Some(f64::NAN), 600_000), 600_000);
        assert_eq!(idle_timeout_or(Some(-1.0), 600_000), 600_000);
    }

    #[test]
    fn required_rejects_missing_and_empty() {
        assert!(required(Some("h".into()), "host").is_ok());
        assert!(matches!(
            required(None, "host"),
            Err(ApiError::InvalidRequest(_))
        ));
        assert!(matches!(
            required(Some(String::new()), "password"),
            Err(ApiError::InvalidRequest(_))
        ));
    }
}
