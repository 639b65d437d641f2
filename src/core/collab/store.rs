//! Note storage consumed by the collaboration coordinator
//!
//! The coordinator never owns notes; it loads them on join and writes back
//! content and the lock owner through [`NoteStore`]. Two implementations
//! exist: [`MemoryNoteStore`] here and the PostgreSQL-backed
//! [`NoteRepository`](crate::core::db::NoteRepository).

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::protocol::{NoteId, UserId};
use crate::core::db::models::{CreateNote, Note};

/// Errors reported by a note store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Note not found")]
    NotFound,

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Persistence operations used by the coordinator
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Load a note, `Ok(None)` if it does not exist
    async fn load_note(&self, note_id: NoteId) -> Result<Option<Note>, StoreError>;

    /// Overwrite the note content
    async fn save_note_content(&self, note_id: NoteId, content: &str) -> Result<(), StoreError>;

    /// Mirror the current lock holder into the note record
    async fn set_lock_owner(
        &self,
        note_id: NoteId,
        holder: Option<UserId>,
    ) -> Result<(), StoreError>;

    /// Create a note owned by `owner_id`
    async fn create_note(&self, owner_id: UserId, data: CreateNote) -> Result<Note, StoreError>;
}

/// In-process note store, used when no database is configured
#[derive(Default)]
pub struct MemoryNoteStore {
    notes: DashMap<NoteId, Note>,
}

impl MemoryNoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a note
    pub fn insert(&self, note: Note) {
        self.notes.insert(note.id, note);
    }

    /// Remove a note, e.g. when its owner deletes it
    pub fn remove(&self, note_id: &NoteId) -> Option<Note> {
        self.notes.remove(note_id).map(|(_, note)| note)
    }

    pub fn get(&self, note_id: &NoteId) -> Option<Note> {
        self.notes.get(note_id).map(|n| n.clone())
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

#[async_trait]
impl NoteStore for MemoryNoteStore {
    async fn load_note(&self, note_id: NoteId) -> Result<Option<Note>, StoreError> {
        Ok(self.get(&note_id))
    }

    async fn save_note_content(&self, note_id: NoteId, content: &str) -> Result<(), StoreError> {
        let mut note = self.notes.get_mut(&note_id).ok_or(StoreError::NotFound)?;
        note.content = content.to_string();
        note.updated_at = Utc::now();
        Ok(())
    }

    async fn set_lock_owner(
        &self,
        note_id: NoteId,
        holder: Option<UserId>,
    ) -> Result<(), StoreError> {
        let mut note = self.notes.get_mut(&note_id).ok_or(StoreError::NotFound)?;
        note.locked_at = holder.map(|_| Utc::now());
        note.locked_by = holder;
        Ok(())
    }

    async fn create_note(&self, owner_id: UserId, data: CreateNote) -> Result<Note, StoreError> {
        let note = Note::new(owner_id, data);
        self.insert(note.clone());
        Ok(note)
    }
}
