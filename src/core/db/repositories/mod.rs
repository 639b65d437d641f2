//! Database repositories

pub mod note;

pub use note::{NoteRepository, NoteRepositoryError};
