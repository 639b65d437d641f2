//! WebSocket protocol messages and DTOs for note collaboration
//!
//! This module defines all message types exchanged between clients and the
//! collaboration coordinator, as well as the data transfer objects used by the
//! REST API.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Type Aliases
// ============================================================================

/// Unique user identifier
pub type UserId = Uuid;

/// Note identifier (UUID)
pub type NoteId = Uuid;

/// Identifier of a single transport connection
pub type ConnectionId = Uuid;

/// Maximum note content length in characters
pub const MAX_CONTENT_CHARS: usize = 1000;

/// Maximum note title length in characters
pub const MAX_TITLE_CHARS: usize = 100;

// ============================================================================
// Identities
// ============================================================================

/// Basic user information, used both for viewers and for lock holders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: UserId,
    pub username: String,
}

impl UserInfo {
    pub fn new(user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
        }
    }
}

// ============================================================================
// REST API DTOs
// ============================================================================

/// Presence information for a note returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceResponse {
    pub note_id: NoteId,
    /// Users currently joined to the note's room
    pub viewers: Vec<UserInfo>,
    /// Current lock holder, if any
    pub holder: Option<UserInfo>,
    /// When the current holder took the lock (RFC 3339)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<String>,
}

/// Request to create a new note
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNoteRequest {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_public: bool,
    /// Users granted edit rights besides the owner
    #[serde(default)]
    pub collaborators: Vec<UserId>,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub code: ApiErrorCode,
}

/// API error codes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorCode {
    NoteNotFound,
    Unauthorized,
    Forbidden,
    BadRequest,
    InternalError,
}

impl ApiError {
    pub fn note_not_found() -> Self {
        Self {
            error: "Note not found".to_string(),
            code: ApiErrorCode::NoteNotFound,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: ApiErrorCode::Unauthorized,
        }
    }

    pub fn forbidden() -> Self {
        Self {
            error: "You don't have permission to access this note".to_string(),
            code: ApiErrorCode::Forbidden,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: ApiErrorCode::BadRequest,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: ApiErrorCode::InternalError,
        }
    }
}

// ============================================================================
// WebSocket Protocol Messages
// ============================================================================

/// Client-to-server WebSocket messages
///
/// The sender's identity is never part of the payload; it is bound to the
/// connection when the socket is upgraded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a note's room. Joining another note leaves the current one.
    Join { note_id: NoteId },

    /// Leave a note's room, releasing the lock if held
    Leave { note_id: NoteId },

    /// Request the exclusive edit lock
    AcquireLock { note_id: NoteId },

    /// Give up the edit lock
    ReleaseLock { note_id: NoteId },

    /// Replace the note content (only accepted from the lock holder)
    ContentChange { note_id: NoteId, content: String },

    /// Keepalive
    Ping,
}

/// Server-to-client WebSocket messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent to the joining connection only
    Joined {
        note_id: NoteId,
        title: String,
        content: String,
        holder: Option<UserInfo>,
        viewers: Vec<UserInfo>,
    },

    /// The set of users in the room changed
    ViewersUpdated {
        note_id: NoteId,
        viewers: Vec<UserInfo>,
    },

    /// A user took (or renewed) the edit lock
    LockAcquired { note_id: NoteId, holder: UserInfo },

    /// Nobody holds the edit lock anymore
    LockReleased { note_id: NoteId },

    /// Sent to a requester whose lock request or change was denied.
    /// `holder` is `None` when the lock is free and must be acquired first.
    LockHeldBy {
        note_id: NoteId,
        holder: Option<UserInfo>,
    },

    /// New note content from the lock holder
    ContentUpdated { note_id: NoteId, content: String },

    /// Error message. After a terminal error the connection is no longer
    /// part of the room.
    Error {
        code: WsErrorCode,
        message: String,
        terminal: bool,
    },

    /// Pong response to Ping
    Pong,
}

/// WebSocket error codes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WsErrorCode {
    NoteNotFound,
    Forbidden,
    NotJoined,
    ContentTooLong,
    SaveFailed,
    StorageUnavailable,
    InvalidMessage,
}

impl WsErrorCode {
    /// Whether the connection is evicted from the room after this error
    pub fn is_terminal(&self) -> bool {
        matches!(self, WsErrorCode::NoteNotFound)
    }
}

// ============================================================================
// Helper Implementations
// ============================================================================

impl ServerMessage {
    /// Create an error message
    pub fn error(code: WsErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
            terminal: code.is_terminal(),
        }
    }

    /// The note this message refers to, if any
    pub fn note_id(&self) -> Option<NoteId> {
        match self {
            Self::Joined { note_id, .. }
            | Self::ViewersUpdated { note_id, .. }
            | Self::LockAcquired { note_id, .. }
            | Self::LockReleased { note_id }
            | Self::LockHeldBy { note_id, .. }
            | Self::ContentUpdated { note_id, .. } => Some(*note_id),
            Self::Error { .. } | Self::Pong => None,
        }
    }
}

impl ClientMessage {
    /// The note this message targets, if any
    pub fn note_id(&self) -> Option<NoteId> {
        match self {
            Self::Join { note_id }
            | Self::Leave { note_id }
            | Self::AcquireLock { note_id }
            | Self::ReleaseLock { note_id }
            | Self::ContentChange { note_id, .. } => Some(*note_id),
            Self::Ping => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_wire_format() {
        let note_id = Uuid::new_v4();
        let json = format!(
            r#"{{"type":"content_change","payload":{{"note_id":"{}","content":"hello"}}}}"#,
            note_id
        );

        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            ClientMessage::ContentChange {
                note_id: id,
                content,
            } => {
                assert_eq!(id, note_id);
                assert_eq!(content, "hello");
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_client_message_ping() {
        let parsed: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(parsed, ClientMessage::Ping));
        assert!(parsed.note_id().is_none());
    }

    #[test]
    fn test_client_message_rejects_unknown_type() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type":"start_editing"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_server_message_error_serialization() {
        let msg = ServerMessage::error(WsErrorCode::NoteNotFound, "Note not found");
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("note_not_found"));
        assert!(json.contains(r#""terminal":true"#));
    }

    #[test]
    fn test_non_terminal_errors() {
        for code in [
            WsErrorCode::Forbidden,
            WsErrorCode::NotJoined,
            WsErrorCode::ContentTooLong,
            WsErrorCode::SaveFailed,
            WsErrorCode::StorageUnavailable,
            WsErrorCode::InvalidMessage,
        ] {
            assert!(!code.is_terminal(), "{:?} should not be terminal", code);
        }
    }

    #[test]
    fn test_lock_held_by_with_free_lock() {
        let msg = ServerMessage::LockHeldBy {
            note_id: Uuid::new_v4(),
            holder: None,
        };
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("lock_held_by"));
        assert!(json.contains(r#""holder":null"#));
    }

    #[test]
    fn test_server_message_note_id() {
        let note_id = Uuid::new_v4();
        let msg = ServerMessage::LockReleased { note_id };
        assert_eq!(msg.note_id(), Some(note_id));
        assert_eq!(ServerMessage::Pong.note_id(), None);
    }

    #[test]
    fn test_api_error_codes() {
        assert_eq!(ApiError::note_not_found().code, ApiErrorCode::NoteNotFound);
        assert_eq!(ApiError::forbidden().code, ApiErrorCode::Forbidden);
        assert_eq!(
            ApiError::unauthorized("no token").code,
            ApiErrorCode::Unauthorized
        );

        let json = serde_json::to_string(&ApiError::bad_request("bad")).unwrap();
        assert!(json.contains("bad_request"));
    }
}
