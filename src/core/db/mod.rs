//! Database module for collab-notes
//!
//! PostgreSQL persistence for notes using SQLx. The collaboration coordinator
//! only sees it through the `NoteStore` trait.

pub mod models;
pub mod pool;
pub mod repositories;

pub use models::{CreateNote, Note};
pub use pool::{DbConfig, DbError, connect_note_store, create_pool};
pub use repositories::{NoteRepository, NoteRepositoryError};

pub use sqlx::PgPool;
