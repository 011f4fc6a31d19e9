//! HTTP route definitions for the local UI

use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{CellPosition, ConfirmError, GameError, ScoreCellValue};
use crate::room::{CommandOutcome, RoomId, SessionError, SessionView, SyncStatus};
use crate::store::DisplayPreference;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Upper bound for one UI request. Room pushes have their own, shorter bound.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let match_routes = Router::new()
        .route("/match/start", post(start_handler))
        .route("/match/cell", post(cell_handler))
        .route("/match/active", post(active_handler))
        .route("/match/finish", post(finish_handler))
        .route("/match/reset", post(reset_handler));

    let room_routes = Router::new()
        .route("/room/host", post(host_handler))
        .route("/room/join", post(join_handler))
        .route("/room/cancel", post(cancel_join_handler))
        .route("/room/leave", post(leave_handler));

    Router::new()
        .route("/health", get(health_handler))
        .route("/state", get(state_handler))
        .route("/ws", get(ws_handler))
        .route("/confirm/:id/accept", post(accept_handler))
        .route("/confirm/:id/reject", post(reject_handler))
        .route("/settings", get(get_settings_handler).put(put_settings_handler))
        .merge(match_routes)
        .merge(room_routes)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health and state
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    backends: Vec<&'static str>,
    room: Option<RoomId>,
    sync: SyncStatus,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let view = state.session.view().await;

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        backends: state.backends.clone(),
        room: view.room.map(|r| r.room_id),
        sync: view.sync,
    })
}

async fn state_handler(State(state): State<AppState>) -> Json<SessionView> {
    Json(state.session.view().await)
}

/// Outcome of a command plus the view it left behind
#[derive(Serialize)]
struct CommandResponse {
    #[serde(flatten)]
    outcome: CommandOutcome,
    view: SessionView,
}

async fn respond(state: &AppState, outcome: CommandOutcome) -> Json<CommandResponse> {
    Json(CommandResponse {
        outcome,
        view: state.session.view().await,
    })
}

// ============================================================================
// Match endpoints
// ============================================================================

#[derive(Deserialize)]
struct StartRequest {
    names: Vec<String>,
}

async fn start_handler(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> Result<Json<CommandResponse>, AppError> {
    let outcome = state.session.start_match(&req.names).await?;
    Ok(respond(&state, outcome).await)
}

#[derive(Deserialize)]
struct CellRequest {
    player_index: usize,
    position: CellPosition,
    #[serde(default)]
    value: ScoreCellValue,
}

async fn cell_handler(
    State(state): State<AppState>,
    Json(req): Json<CellRequest>,
) -> Result<Json<CommandResponse>, AppError> {
    let outcome = state
        .session
        .set_cell(req.player_index, req.position, req.value)
        .await?;
    Ok(respond(&state, outcome).await)
}

#[derive(Deserialize)]
struct ActiveRequest {
    index: usize,
}

async fn active_handler(
    State(state): State<AppState>,
    Json(req): Json<ActiveRequest>,
) -> Result<Json<CommandResponse>, AppError> {
    let outcome = state.session.set_active_index(req.index).await?;
    Ok(respond(&state, outcome).await)
}

async fn finish_handler(State(state): State<AppState>) -> Result<Json<CommandResponse>, AppError> {
    let outcome = state.session.request_finish().await?;
    Ok(respond(&state, outcome).await)
}

#[derive(Deserialize)]
struct ResetRequest {
    #[serde(default)]
    preserve_names: bool,
}

async fn reset_handler(
    State(state): State<AppState>,
    Json(req): Json<ResetRequest>,
) -> Result<Json<CommandResponse>, AppError> {
    let outcome = state.session.request_reset(req.preserve_names).await?;
    Ok(respond(&state, outcome).await)
}

// ============================================================================
// Room endpoints
// ============================================================================

#[derive(Serialize)]
struct HostResponse {
    room_id: RoomId,
    view: SessionView,
}

async fn host_handler(State(state): State<AppState>) -> Result<Json<HostResponse>, AppError> {
    let room_id = state.session.host_room().await?;
    Ok(Json(HostResponse {
        room_id,
        view: state.session.view().await,
    }))
}

#[derive(Deserialize)]
struct JoinRequest {
    room_id: String,
}

async fn join_handler(
    State(state): State<AppState>,
    Json(req): Json<JoinRequest>,
) -> Result<Json<CommandResponse>, AppError> {
    state.session.join_room(&req.room_id).await?;
    Ok(respond(&state, CommandOutcome::Applied).await)
}

async fn cancel_join_handler(
    State(state): State<AppState>,
) -> Result<Json<CommandResponse>, AppError> {
    state.session.cancel_join().await?;
    Ok(respond(&state, CommandOutcome::Applied).await)
}

async fn leave_handler(State(state): State<AppState>) -> Result<Json<CommandResponse>, AppError> {
    let outcome = state.session.request_leave().await?;
    Ok(respond(&state, outcome).await)
}

// ============================================================================
// Confirmation endpoints
// ============================================================================

async fn accept_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CommandResponse>, AppError> {
    let outcome = state.session.confirm(id).await?;
    Ok(respond(&state, outcome).await)
}

async fn reject_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CommandResponse>, AppError> {
    state.session.cancel(id).await?;
    Ok(respond(&state, CommandOutcome::Applied).await)
}

// ============================================================================
// Settings endpoints
// ============================================================================

async fn get_settings_handler(State(state): State<AppState>) -> Json<DisplayPreference> {
    Json(state.session.preference().await)
}

async fn put_settings_handler(
    State(state): State<AppState>,
    Json(preference): Json<DisplayPreference>,
) -> Json<DisplayPreference> {
    state.session.update_preference(preference).await;
    Json(preference)
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        let message = e.to_string();
        match e {
            SessionError::Game(GameError::WrongPhase { .. })
            | SessionError::AlreadyInRoom(_)
            | SessionError::NotInRoom
            | SessionError::NotJoining => AppError::Conflict(message),
            SessionError::Confirm(ConfirmError::NotPending(_)) => AppError::NotFound(message),
            SessionError::Game(_) | SessionError::InvalidRoomId(_) => AppError::BadRequest(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
