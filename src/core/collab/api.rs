//! HTTP surface of the collaboration service
//!
//! Routes:
//! - `GET  /ws` - WebSocket upgrade (see websocket module)
//! - `GET  /health` - liveness and room statistics
//! - `GET  /notes/{note_id}/presence` - viewers and lock holder of a note
//! - `POST /notes` - create a note owned by the caller
//!
//! Authentication is handled by the [`AuthenticatedUser`] extractor.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRef, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;

use super::auth::{AuthSettings, AuthenticatedUser};
use super::coordinator::Coordinator;
use super::protocol::*;
use super::websocket::ws_handler;
use crate::core::db::models::CreateNote;

// ============================================================================
// Application State
// ============================================================================

/// Shared state of the collaboration endpoints
#[derive(Clone)]
pub struct CollabState {
    pub coordinator: Arc<Coordinator>,
    pub auth: AuthSettings,
}

impl CollabState {
    pub fn new(coordinator: Arc<Coordinator>, auth: AuthSettings) -> Self {
        Self { coordinator, auth }
    }
}

impl FromRef<CollabState> for AuthSettings {
    fn from_ref(state: &CollabState) -> Self {
        state.auth.clone()
    }
}

// ============================================================================
// Router
// ============================================================================

pub fn collab_router(state: CollabState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/notes", post(create_note))
        .route("/notes/{note_id}/presence", get(get_presence))
        .with_state(state)
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /health
async fn health(State(state): State<CollabState>) -> impl IntoResponse {
    let coordinator = &state.coordinator;
    Json(json!({
        "status": "ok",
        "rooms": coordinator.hub().room_count(),
        "connections": coordinator.connection_count(),
        "active_notes": coordinator.sessions().active_note_count(),
        "locked_notes": coordinator.locks().locked_count(),
    }))
}

/// Viewers and lock holder of a note
///
/// GET /notes/{note_id}/presence
///
/// Response: PresenceResponse (200 OK) or ApiError
async fn get_presence(
    State(state): State<CollabState>,
    user: AuthenticatedUser,
    Path(note_id): Path<NoteId>,
) -> impl IntoResponse {
    let note = match state.coordinator.store().load_note(note_id).await {
        Ok(Some(note)) => note,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, Json(ApiError::note_not_found())).into_response();
        }
        Err(e) => {
            tracing::error!(note_id = %note_id, error = %e, "Failed to load note");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::internal("Failed to load note")),
            )
                .into_response();
        }
    };

    if !note.can_view(user.user_id) {
        return (StatusCode::FORBIDDEN, Json(ApiError::forbidden())).into_response();
    }

    let presence = state.coordinator.presence(note_id).await;
    (StatusCode::OK, Json(presence)).into_response()
}

/// Create a note
///
/// POST /notes
///
/// Request body: CreateNoteRequest
/// Response: Note (201 Created) or ApiError
///
/// Guests can view and edit shared notes but cannot own any.
async fn create_note(
    State(state): State<CollabState>,
    user: AuthenticatedUser,
    Json(request): Json<CreateNoteRequest>,
) -> impl IntoResponse {
    if user.is_guest {
        return (
            StatusCode::FORBIDDEN,
            Json(ApiError {
                error: "Guests cannot create notes".to_string(),
                code: ApiErrorCode::Forbidden,
            }),
        )
            .into_response();
    }

    let title = request.title.trim();
    if title.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError::bad_request("Title is required")),
        )
            .into_response();
    }

    let title_len = title.chars().count();
    if title_len > MAX_TITLE_CHARS {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError::bad_request(format!(
                "Title is {} characters, the limit is {}",
                title_len, MAX_TITLE_CHARS
            ))),
        )
            .into_response();
    }

    let len = request.content.chars().count();
    if len > MAX_CONTENT_CHARS {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError::bad_request(format!(
                "Content is {} characters, the limit is {}",
                len, MAX_CONTENT_CHARS
            ))),
        )
            .into_response();
    }

    let data = CreateNote {
        title: title.to_string(),
        content: request.content,
        tags: request.tags,
        is_public: request.is_public,
        collaborators: request.collaborators,
    };

    match state.coordinator.store().create_note(user.user_id, data).await {
        Ok(note) => {
            tracing::info!(note_id = %note.id, user_id = %user.user_id, "Note created");
            (StatusCode::CREATED, Json(note)).into_response()
        }
        Err(e) => {
            tracing::error!(user_id = %user.user_id, error = %e, "Failed to create note");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::internal("Failed to create note")),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
