//! HTTP surface: RFID scan endpoint for the card reader, JSON for the dashboard.

use crate::engine::EngineError;
use crate::state::AppState;
use attend_core::{normalize_rfid, AttendanceRecord, Embedding, Stats, StoreError};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;

const DASHBOARD_HTML: &str = include_str!("../assets/dashboard.html");

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/api/stats", get(stats))
        .route("/api/users", get(users))
        .route("/api/attendance", get(attendance))
        .route("/scan_rfid", post(scan_rfid))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub rfid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatus {
    Verified,
    Failed,
    NotRegistered,
    Error,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScanResponse {
    pub status: ScanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub message: String,
}

impl ScanResponse {
    fn new(status: ScanStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            name: None,
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserSummary {
    pub rfid: String,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub users: usize,
    pub attendance: usize,
}

/// Failures that are the server's fault, not the person at the reader's.
#[derive(Debug, Error)]
enum ScanError {
    #[error(transparent)]
    Engine(EngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IntoResponse for ScanError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "scan failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ScanResponse::new(ScanStatus::Error, format!("Server error: {self}"))),
        )
            .into_response()
    }
}

async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<Stats> {
    let total_users = state.user_count().await;
    let today = chrono::Local::now().date_naive();
    Json(state.attendance.lock().await.stats(total_users, today))
}

async fn users(State(state): State<Arc<AppState>>) -> Json<Vec<UserSummary>> {
    state.refresh_users().await;
    let users = state.users.read().await;
    Json(
        users
            .store()
            .iter()
            .map(|(rfid, rec)| UserSummary {
                rfid: rfid.to_string(),
                name: rec.name.clone(),
            })
            .collect(),
    )
}

async fn attendance(State(state): State<Arc<AppState>>) -> Json<Vec<AttendanceRecord>> {
    Json(state.attendance.lock().await.newest_first())
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Health> {
    let users = state.user_count().await;
    let attendance = state.attendance.lock().await.len();
    Json(Health {
        status: "OK".into(),
        users,
        attendance,
    })
}

async fn scan_rfid(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ScanRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(p) => p,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "rejected scan request");
            return (
                StatusCode::BAD_REQUEST,
                Json(ScanResponse::new(
                    ScanStatus::Error,
                    format!("Invalid request: {}", rejection.body_text()),
                )),
            )
                .into_response();
        }
    };

    let rfid = normalize_rfid(&req.rfid);
    tracing::info!(rfid = %rfid, "RFID scan received");

    match process_scan(&state, &rfid).await {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn process_scan(state: &AppState, rfid: &str) -> Result<ScanResponse, ScanError> {
    let (name, reference): (String, Embedding) = {
        state.refresh_users().await;
        let users = state.users.read().await;
        match users.store().get(rfid) {
            Some(rec) => (rec.name.clone(), rec.embedding()),
            None => {
                tracing::info!(rfid, "RFID not registered");
                return Ok(ScanResponse::new(
                    ScanStatus::NotRegistered,
                    "This RFID card is not registered. Please register first.",
                ));
            }
        }
    };

    tracing::info!(rfid, name = %name, "RFID registered; starting face verification");

    let verify = match state.engine.verify(reference, state.match_threshold).await {
        Ok(v) => v,
        Err(e) if e.is_capture_failure() => {
            tracing::warn!(rfid, error = %e, "face capture failed");
            return Ok(ScanResponse::new(ScanStatus::Failed, e.to_string()));
        }
        Err(e) => return Err(ScanError::Engine(e)),
    };

    if !verify.result.matched {
        tracing::warn!(
            rfid,
            expected = %name,
            distance = verify.result.distance,
            threshold = verify.threshold,
            "face mismatch"
        );
        return Ok(ScanResponse::new(
            ScanStatus::Failed,
            "Face verification failed. The face does not match the registered user.",
        ));
    }

    let record = {
        let mut log = state.attendance.lock().await;
        let record = log.record(rfid, &name, chrono::Local::now());
        // The lock stays held so saves land on disk in order.
        let snapshot = log.clone();
        let saved = tokio::task::spawn_blocking(move || snapshot.save())
            .await
            .map_err(ScanError::from)
            .and_then(|r| r.map_err(ScanError::from));
        if let Err(e) = saved {
            log.rollback_last();
            return Err(e);
        }
        record
    };

    tracing::info!(rfid, name = %name, at = %record.timestamp, "face verified; attendance marked");

    Ok(ScanResponse {
        status: ScanStatus::Verified,
        message: format!("Welcome, {name}! Attendance marked."),
        name: Some(name),
    })
}
