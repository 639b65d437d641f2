//! Database models for collab-notes
//!
//! This module defines the database entity structs that map to PostgreSQL tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================================================
// Note Model
// ============================================================================

/// Note entity
///
/// `locked_by`/`locked_at` mirror the live edit lock so that a crashed
/// process leaves a visible trace of who was editing.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Note {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub is_public: bool,
    /// Users with edit rights besides the owner
    pub collaborators: Vec<Uuid>,
    pub locked_by: Option<Uuid>,
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    /// Build a new, unlocked note owned by `owner_id`
    pub fn new(owner_id: Uuid, data: CreateNote) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            title: data.title,
            content: data.content,
            tags: data.tags,
            is_public: data.is_public,
            collaborators: data.collaborators,
            locked_by: None,
            locked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Owner or collaborator
    pub fn can_edit(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id || self.collaborators.contains(&user_id)
    }

    /// Editors plus everyone when the note is public
    pub fn can_view(&self, user_id: Uuid) -> bool {
        self.is_public || self.can_edit(user_id)
    }
}

/// Note data for creation (without id, lock fields and timestamps)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CreateNote {
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub is_public: bool,
    pub collaborators: Vec<Uuid>,
}
