//! Errors raised while handling client events

use super::protocol::{MAX_CONTENT_CHARS, NoteId, ServerMessage, WsErrorCode};
use super::store::StoreError;

/// Failure of a client event. Each variant maps to one wire error code.
#[derive(Debug, thiserror::Error)]
pub enum CollabError {
    #[error("Note {0} not found")]
    NoteNotFound(NoteId),

    #[error("Forbidden: {0}")]
    Forbidden(&'static str),

    #[error("Not joined to note {0}")]
    NotJoined(NoteId),

    #[error("Content is {len} characters, the limit is {max}")]
    ContentTooLong { len: usize, max: usize },

    #[error("Failed to save note {note_id}: {source}")]
    SaveFailed {
        note_id: NoteId,
        #[source]
        source: StoreError,
    },

    #[error("Storage unavailable: {0}")]
    Storage(#[from] StoreError),
}

impl CollabError {
    pub fn content_too_long(len: usize) -> Self {
        Self::ContentTooLong {
            len,
            max: MAX_CONTENT_CHARS,
        }
    }

    pub fn code(&self) -> WsErrorCode {
        match self {
            Self::NoteNotFound(_) => WsErrorCode::NoteNotFound,
            Self::Forbidden(_) => WsErrorCode::Forbidden,
            Self::NotJoined(_) => WsErrorCode::NotJoined,
            Self::ContentTooLong { .. } => WsErrorCode::ContentTooLong,
            Self::SaveFailed { .. } => WsErrorCode::SaveFailed,
            Self::Storage(_) => WsErrorCode::StorageUnavailable,
        }
    }

    /// Terminal errors end the connection's membership in the room
    pub fn is_terminal(&self) -> bool {
        self.code().is_terminal()
    }

    /// Error message for the requesting connection
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::error(self.code(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_codes() {
        let note_id = Uuid::new_v4();

        assert_eq!(
            CollabError::NoteNotFound(note_id).code(),
            WsErrorCode::NoteNotFound
        );
        assert_eq!(
            CollabError::content_too_long(1001).code(),
            WsErrorCode::ContentTooLong
        );
        assert_eq!(
            CollabError::from(StoreError::Backend("down".to_string())).code(),
            WsErrorCode::StorageUnavailable
        );
    }

    #[test]
    fn test_only_missing_note_is_terminal() {
        assert!(CollabError::NoteNotFound(Uuid::new_v4()).is_terminal());
        assert!(!CollabError::Forbidden("read-only").is_terminal());
        assert!(
            !CollabError::SaveFailed {
                note_id: Uuid::new_v4(),
                source: StoreError::Backend("timeout".to_string()),
            }
            .is_terminal()
        );
    }

    #[test]
    fn test_to_message() {
        let msg = CollabError::content_too_long(1200).to_message();
        match msg {
            ServerMessage::Error {
                code,
                message,
                terminal,
            } => {
                assert_eq!(code, WsErrorCode::ContentTooLong);
                assert!(message.contains("1200"));
                assert!(!terminal);
            }
            _ => panic!("Expected error message"),
        }
    }
}
