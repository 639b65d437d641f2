//! Note repository
//!
//! PostgreSQL implementation of the collaboration [`NoteStore`].

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::core::collab::store::{NoteStore, StoreError};
use crate::core::db::models::{CreateNote, Note};

/// Errors that can occur in note operations
#[derive(Debug, thiserror::Error)]
pub enum NoteRepositoryError {
    #[error("Note not found")]
    NotFound,

    #[error("Database error: {0}")]
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for NoteRepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound,
            _ => Self::DatabaseError(err),
        }
    }
}

impl From<NoteRepositoryError> for StoreError {
    fn from(err: NoteRepositoryError) -> Self {
        match err {
            NoteRepositoryError::NotFound => StoreError::NotFound,
            NoteRepositoryError::DatabaseError(e) => StoreError::Backend(e.to_string()),
        }
    }
}

const NOTE_COLUMNS: &str = "id, owner_id, title, content, tags, is_public, collaborators, \
                            locked_by, locked_at, created_at, updated_at";

/// Repository for note operations
pub struct NoteRepository {
    pool: PgPool,
}

impl NoteRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Note>, NoteRepositoryError> {
        let note = sqlx::query_as::<_, Note>(&format!(
            "SELECT {} FROM notes WHERE id = $1",
            NOTE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(note)
    }

    pub async fn create(&self, owner_id: Uuid, data: CreateNote) -> Result<Note, NoteRepositoryError> {
        let note = sqlx::query_as::<_, Note>(&format!(
            r#"
            INSERT INTO notes (owner_id, title, content, tags, is_public, collaborators)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            NOTE_COLUMNS
        ))
        .bind(owner_id)
        .bind(&data.title)
        .bind(&data.content)
        .bind(&data.tags)
        .bind(data.is_public)
        .bind(&data.collaborators)
        .fetch_one(&self.pool)
        .await?;

        Ok(note)
    }

    /// Overwrite the content, `NotFound` if the note is gone
    pub async fn update_content(&self, id: Uuid, content: &str) -> Result<(), NoteRepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE notes
            SET content = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(content)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(NoteRepositoryError::NotFound);
        }
        Ok(())
    }

    /// Record the lock holder; `None` clears both lock columns
    pub async fn set_locked_by(
        &self,
        id: Uuid,
        holder: Option<Uuid>,
    ) -> Result<(), NoteRepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE notes
            SET locked_by = $2,
                locked_at = CASE WHEN $2 IS NULL THEN NULL ELSE NOW() END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(holder)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(NoteRepositoryError::NotFound);
        }
        Ok(())
    }

    /// Clear lock columns left behind by a previous process
    pub async fn clear_stale_locks(&self) -> Result<u64, NoteRepositoryError> {
        let result = sqlx::query(
            "UPDATE notes SET locked_by = NULL, locked_at = NULL WHERE locked_by IS NOT NULL",
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl NoteStore for NoteRepository {
    async fn load_note(&self, note_id: Uuid) -> Result<Option<Note>, StoreError> {
        Ok(self.find_by_id(note_id).await?)
    }

    async fn save_note_content(&self, note_id: Uuid, content: &str) -> Result<(), StoreError> {
        Ok(self.update_content(note_id, content).await?)
    }

    async fn set_lock_owner(&self, note_id: Uuid, holder: Option<Uuid>) -> Result<(), StoreError> {
        Ok(self.set_locked_by(note_id, holder).await?)
    }

    async fn create_note(&self, owner_id: Uuid, data: CreateNote) -> Result<Note, StoreError> {
        Ok(self.create(owner_id, data).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err = NoteRepositoryError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, NoteRepositoryError::NotFound));
        assert!(matches!(StoreError::from(err), StoreError::NotFound));
    }

    #[test]
    fn test_database_error_maps_to_backend() {
        let err = NoteRepositoryError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, NoteRepositoryError::DatabaseError(_)));

        let store_err = StoreError::from(err);
        assert!(matches!(store_err, StoreError::Backend(ref msg) if msg.contains("timed out")));
    }

    #[test]
    fn test_note_columns_cover_model() {
        for column in [
            "id",
            "owner_id",
            "title",
            "content",
            "tags",
            "is_public",
            "collaborators",
            "locked_by",
            "locked_at",
            "created_at",
            "updated_at",
        ] {
            assert!(NOTE_COLUMNS.contains(column), "missing column {}", column);
        }
    }
}
