//! Content change fan-out
//!
//! A change is accepted only from the current lock holder. The holder check,
//! the save, the lock renewal and the broadcast all happen while holding the
//! note's lock record, so the holder cannot change while the save is in
//! flight and accepted changes are broadcast in the order they were saved.

use std::sync::Arc;

use super::error::CollabError;
use super::hub::RoomHub;
use super::lock::{LockError, LockManager};
use super::protocol::{ConnectionId, MAX_CONTENT_CHARS, NoteId, ServerMessage, UserId, UserInfo};
use super::store::{NoteStore, StoreError};

/// Result of a content submission that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Saved, lock renewed and broadcast to the other room members
    Accepted,
    /// The submitter does not hold the lock; nothing happened
    Rejected { holder: Option<UserInfo> },
}

pub struct ChangePropagator {
    locks: Arc<LockManager>,
    hub: Arc<RoomHub>,
    store: Arc<dyn NoteStore>,
}

impl ChangePropagator {
    pub fn new(locks: Arc<LockManager>, hub: Arc<RoomHub>, store: Arc<dyn NoteStore>) -> Self {
        Self { locks, hub, store }
    }

    /// Submit new content for a note on behalf of `user_id`.
    ///
    /// `origin` is the submitting connection, which does not receive its own
    /// `content_updated` event.
    pub async fn submit_change(
        &self,
        note_id: NoteId,
        user_id: UserId,
        origin: ConnectionId,
        content: String,
    ) -> Result<SubmitOutcome, CollabError> {
        let len = content.chars().count();
        if len > MAX_CONTENT_CHARS {
            return Err(CollabError::content_too_long(len));
        }

        let mut record = self.locks.lock_record(note_id).await;

        if let Err(LockError::NotHolder { holder }) = record.check_holder(user_id) {
            tracing::debug!(
                note_id = %note_id,
                user_id = %user_id,
                "Rejected content change from non-holder"
            );
            return Ok(SubmitOutcome::Rejected { holder });
        }

        match self.store.save_note_content(note_id, &content).await {
            Ok(()) => {}
            Err(StoreError::NotFound) => return Err(CollabError::NoteNotFound(note_id)),
            Err(source) => {
                tracing::warn!(note_id = %note_id, error = %source, "Failed to save note content");
                return Err(CollabError::SaveFailed { note_id, source });
            }
        }

        if let Err(LockError::NotHolder { holder }) =
            self.locks.renew_locked(&mut record, note_id, user_id, origin)
        {
            return Ok(SubmitOutcome::Rejected { holder });
        }

        self.hub.broadcast_from(
            note_id,
            origin,
            ServerMessage::ContentUpdated { note_id, content },
        );
        drop(record);

        tracing::debug!(note_id = %note_id, user_id = %user_id, chars = len, "Content change applied");
        Ok(SubmitOutcome::Accepted)
    }
}
