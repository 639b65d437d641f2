//! Real-time collaborative note editing
//!
//! Clients join a note over a WebSocket and see who else is viewing it.
//! Only one user at a time may edit a note:
//! - The edit lock is granted on request and reclaimed after a period of inactivity
//! - Content changes from the holder are persisted, then broadcast to the room
//! - Leaving or disconnecting releases the lock held through that connection

pub mod api;
pub mod auth;
pub mod coordinator;
pub mod error;
pub mod hub;
pub mod lock;
pub mod presence;
pub mod propagator;
pub mod protocol;
pub mod store;
pub mod websocket;

pub use api::{CollabState, collab_router};
pub use auth::{AuthSettings, AuthenticatedUser};
pub use coordinator::Coordinator;
pub use error::CollabError;
pub use lock::{DEFAULT_LOCK_TIMEOUT, LockManager};
pub use protocol::*;
pub use store::{MemoryNoteStore, NoteStore, StoreError};
