//! Tick and state routes

use alerting::AlertState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use decay::DecayedScore;
use monitor::{MonitorError, TickReport};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use telemetry::MonitorKey;
use tracing::error;

use crate::AppState;

/// Route errors
pub enum ApiError {
    UnknownKey(MonitorKey),
    Monitor(MonitorError),
}

impl From<MonitorError> for ApiError {
    fn from(e: MonitorError) -> Self {
        ApiError::Monitor(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::UnknownKey(key) => (StatusCode::NOT_FOUND, format!("{} is not monitored", key)),
            ApiError::Monitor(e) => {
                error!("Request failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Response for the state endpoint
#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub key: MonitorKey,
    /// `None` until the key has been ticked
    pub state: Option<AlertState>,
    pub recent_scores: Vec<DecayedScore>,
}

fn monitored_key(state: &AppState, service: String, metric: String) -> Result<MonitorKey, ApiError> {
    let key = MonitorKey::new(service, metric);
    if state.monitor.keys().contains(&key) {
        Ok(key)
    } else {
        Err(ApiError::UnknownKey(key))
    }
}

/// Run one tick for a monitored key
pub async fn tick(
    State(state): State<Arc<AppState>>,
    Path((service, metric)): Path<(String, String)>,
) -> Result<Json<TickReport>, ApiError> {
    let key = monitored_key(&state, service, metric)?;
    Ok(Json(state.monitor.tick(&key, Utc::now()).await?))
}

/// Current alert state of a monitored key
pub async fn get_state(
    State(state): State<Arc<AppState>>,
    Path((service, metric)): Path<(String, String)>,
) -> Result<Json<StateResponse>, ApiError> {
    let key = monitored_key(&state, service, metric)?;
    let current = state.monitor.get_state(&key).await?;
    Ok(Json(StateResponse {
        recent_scores: state.monitor.recent_scores(&key),
        state: current,
        key,
    }))
}
