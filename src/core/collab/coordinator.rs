//! Connection coordinator
//!
//! Maps connections to the note they joined and routes their events to the
//! session registry, the lock manager and the change propagator. It is the
//! only component that knows about connections as a whole, so it also owns
//! disconnect cleanup.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;

use super::error::CollabError;
use super::hub::{RoomEvent, RoomHub};
use super::lock::{AcquireOutcome, LockManager};
use super::presence::SessionRegistry;
use super::propagator::{ChangePropagator, SubmitOutcome};
use super::protocol::{ConnectionId, NoteId, PresenceResponse, ServerMessage, UserInfo};
use super::store::NoteStore;

/// The note a connection is joined to
#[derive(Debug, Clone)]
pub struct Binding {
    pub note_id: NoteId,
    pub user: UserInfo,
    /// Edit rights at the time of joining
    pub can_edit: bool,
}

/// Result of a successful join
pub struct JoinedRoom {
    /// Room events from the moment of joining
    pub receiver: broadcast::Receiver<RoomEvent>,
    /// `joined` message for the joining connection
    pub snapshot: ServerMessage,
}

/// Routes connection events for every note
pub struct Coordinator {
    sessions: SessionRegistry,
    locks: Arc<LockManager>,
    propagator: ChangePropagator,
    hub: Arc<RoomHub>,
    store: Arc<dyn NoteStore>,
    bindings: DashMap<ConnectionId, Binding>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn NoteStore>, lock_timeout: Duration) -> Self {
        let hub = Arc::new(RoomHub::new());
        let locks = Arc::new(LockManager::new(hub.clone(), store.clone(), lock_timeout));
        let propagator = ChangePropagator::new(locks.clone(), hub.clone(), store.clone());

        Self {
            sessions: SessionRegistry::new(),
            locks,
            propagator,
            hub,
            store,
            bindings: DashMap::new(),
        }
    }

    // ========================================================================
    // Membership
    // ========================================================================

    /// Join a connection to a note's room.
    ///
    /// A connection already joined to another note leaves it first. The
    /// snapshot and the subscription are taken under the note's lock record,
    /// so no content change or lock transition falls between them.
    pub async fn on_join(
        &self,
        connection_id: ConnectionId,
        user: &UserInfo,
        note_id: NoteId,
    ) -> Result<JoinedRoom, CollabError> {
        let record = self.locks.lock_record(note_id).await;

        let note = match self.store.load_note(note_id).await? {
            Some(note) => note,
            None => {
                drop(record);
                self.on_leave(connection_id, note_id).await;
                return Err(CollabError::NoteNotFound(note_id));
            }
        };
        if !note.can_view(user.user_id) {
            return Err(CollabError::Forbidden("You don't have access to this note"));
        }

        let receiver = self.hub.subscribe(note_id);
        let holder = record.holder().map(|holder| holder.user.clone());
        drop(record);

        let previous = self
            .bindings
            .get(&connection_id)
            .map(|binding| binding.note_id)
            .filter(|previous| *previous != note_id);
        if let Some(previous) = previous {
            self.on_leave(connection_id, previous).await;
        }

        self.bindings.insert(
            connection_id,
            Binding {
                note_id,
                user: user.clone(),
                can_edit: note.can_edit(user.user_id),
            },
        );
        let viewers = self.sessions.join(note_id, user, connection_id);

        tracing::info!(
            note_id = %note_id,
            user_id = %user.user_id,
            connection_id = %connection_id,
            viewers = viewers.len(),
            "User joined note"
        );

        self.hub.broadcast(
            note_id,
            ServerMessage::ViewersUpdated {
                note_id,
                viewers: viewers.clone(),
            },
        );

        Ok(JoinedRoom {
            receiver,
            snapshot: ServerMessage::Joined {
                note_id,
                title: note.title,
                content: note.content,
                holder,
                viewers,
            },
        })
    }

    /// Remove a connection from a note's room, releasing a lock it holds.
    /// Returns `false` if the connection was not joined to that note.
    pub async fn on_leave(&self, connection_id: ConnectionId, note_id: NoteId) -> bool {
        let Some((_, binding)) = self
            .bindings
            .remove_if(&connection_id, |_, binding| binding.note_id == note_id)
        else {
            return false;
        };

        self.locks.release_from(note_id, connection_id).await;

        if let Some(viewers) = self
            .sessions
            .leave(note_id, binding.user.user_id, connection_id)
        {
            self.hub
                .broadcast(note_id, ServerMessage::ViewersUpdated { note_id, viewers });
        }

        tracing::info!(
            note_id = %note_id,
            user_id = %binding.user.user_id,
            connection_id = %connection_id,
            "User left note"
        );
        true
    }

    /// Clean up after a closed connection: leave its note and release any
    /// lock still held through it
    pub async fn on_disconnect(&self, connection_id: ConnectionId) {
        let note_id = self
            .bindings
            .get(&connection_id)
            .map(|binding| binding.note_id);
        if let Some(note_id) = note_id {
            self.on_leave(connection_id, note_id).await;
        }
        self.locks.release_connection(connection_id).await;
    }

    // ========================================================================
    // Editing
    // ========================================================================

    /// Request the edit lock for the connection's user
    pub async fn acquire_lock(
        &self,
        connection_id: ConnectionId,
        note_id: NoteId,
    ) -> Result<AcquireOutcome, CollabError> {
        let binding = self.require_binding(connection_id, note_id)?;
        if !binding.can_edit {
            return Err(CollabError::Forbidden(
                "Only the owner and collaborators can edit this note",
            ));
        }
        Ok(self.locks.acquire(note_id, &binding.user, connection_id).await)
    }

    /// Release the edit lock if the connection's user holds it
    pub async fn release_lock(
        &self,
        connection_id: ConnectionId,
        note_id: NoteId,
    ) -> Result<bool, CollabError> {
        let binding = self.require_binding(connection_id, note_id)?;
        Ok(self.locks.release(note_id, binding.user.user_id).await)
    }

    /// Submit new content. A note that disappeared evicts the connection.
    pub async fn content_change(
        &self,
        connection_id: ConnectionId,
        note_id: NoteId,
        content: String,
    ) -> Result<SubmitOutcome, CollabError> {
        let binding = self.require_binding(connection_id, note_id)?;
        let result = self
            .propagator
            .submit_change(note_id, binding.user.user_id, connection_id, content)
            .await;

        if let Err(CollabError::NoteNotFound(_)) = result {
            tracing::warn!(
                note_id = %note_id,
                connection_id = %connection_id,
                "Note vanished, evicting connection"
            );
            self.on_leave(connection_id, note_id).await;
        }
        result
    }

    fn require_binding(
        &self,
        connection_id: ConnectionId,
        note_id: NoteId,
    ) -> Result<Binding, CollabError> {
        self.bindings
            .get(&connection_id)
            .filter(|binding| binding.note_id == note_id)
            .map(|binding| binding.clone())
            .ok_or(CollabError::NotJoined(note_id))
    }

    // ========================================================================
    // Queries & Maintenance
    // ========================================================================

    /// Viewers and lock state of a note
    pub async fn presence(&self, note_id: NoteId) -> PresenceResponse {
        let holder = self.locks.holder(note_id).await;
        PresenceResponse {
            note_id,
            viewers: self.sessions.current_viewers(&note_id),
            locked_at: holder.as_ref().map(|holder| holder.locked_at.to_rfc3339()),
            holder: holder.map(|holder| holder.user),
        }
    }

    pub fn binding(&self, connection_id: ConnectionId) -> Option<Binding> {
        self.bindings.get(&connection_id).map(|binding| binding.clone())
    }

    /// Number of connections joined to a note
    pub fn connection_count(&self) -> usize {
        self.bindings.len()
    }

    /// Drop rooms without subscribers and lock records without holders
    pub fn cleanup_idle(&self) -> (usize, usize) {
        let rooms = self.hub.cleanup_empty_rooms();
        let records = self.locks.prune_released();
        if rooms > 0 || records > 0 {
            tracing::debug!(rooms, records, "Cleaned up idle rooms");
        }
        (rooms, records)
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn hub(&self) -> &Arc<RoomHub> {
        &self.hub
    }

    pub fn store(&self) -> &Arc<dyn NoteStore> {
        &self.store
    }
}
