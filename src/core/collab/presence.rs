//! Session registry: who is currently viewing which note
//!
//! Presence is informational only and has no bearing on edit rights. A user
//! stays in a note's viewer set while at least one of their connections is
//! joined, so two tabs on the same note show up as a single viewer.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::protocol::{ConnectionId, NoteId, UserId, UserInfo};

/// A viewer of a note together with the connections it joined through
#[derive(Debug, Clone)]
struct ViewerEntry {
    info: UserInfo,
    connections: HashSet<ConnectionId>,
    joined_at: DateTime<Utc>,
}

/// Per-note viewer sets
#[derive(Default)]
pub struct SessionRegistry {
    notes: DashMap<NoteId, HashMap<UserId, ViewerEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a viewer to a note and return the resulting viewer list.
    ///
    /// Joining again through the same or another connection never adds a
    /// second entry for the user.
    pub fn join(
        &self,
        note_id: NoteId,
        user: &UserInfo,
        connection_id: ConnectionId,
    ) -> Vec<UserInfo> {
        let mut viewers = self.notes.entry(note_id).or_default();
        viewers
            .entry(user.user_id)
            .or_insert_with(|| ViewerEntry {
                info: user.clone(),
                connections: HashSet::new(),
                joined_at: Utc::now(),
            })
            .connections
            .insert(connection_id);

        sorted_infos(&viewers)
    }

    /// Remove a viewer's connection from a note.
    ///
    /// Returns the new viewer list if the set of viewers changed, `None` if
    /// the call was a no-op (unknown note, user or connection, or the user
    /// is still present through another connection).
    pub fn leave(
        &self,
        note_id: NoteId,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Option<Vec<UserInfo>> {
        let (changed, remaining) = {
            let mut viewers = self.notes.get_mut(&note_id)?;
            let entry = viewers.get_mut(&user_id)?;
            if !entry.connections.remove(&connection_id) {
                return None;
            }
            let changed = entry.connections.is_empty();
            if changed {
                viewers.remove(&user_id);
            }
            (changed, sorted_infos(&viewers))
        };

        if remaining.is_empty() {
            self.notes.remove_if(&note_id, |_, viewers| viewers.is_empty());
        }

        changed.then_some(remaining)
    }

    /// Current viewers of a note, sorted by username
    pub fn current_viewers(&self, note_id: &NoteId) -> Vec<UserInfo> {
        self.notes
            .get(note_id)
            .map(|viewers| sorted_infos(&viewers))
            .unwrap_or_default()
    }

    /// Check if a user is viewing a note
    pub fn is_viewer(&self, note_id: &NoteId, user_id: &UserId) -> bool {
        self.notes
            .get(note_id)
            .is_some_and(|viewers| viewers.contains_key(user_id))
    }

    /// When a user first joined a note, if they are still viewing it
    pub fn joined_at(&self, note_id: &NoteId, user_id: &UserId) -> Option<DateTime<Utc>> {
        self.notes
            .get(note_id)
            .and_then(|viewers| viewers.get(user_id).map(|entry| entry.joined_at))
    }

    /// Number of notes with at least one viewer
    pub fn active_note_count(&self) -> usize {
        self.notes.len()
    }

    /// Total number of viewers across all notes
    pub fn total_viewer_count(&self) -> usize {
        self.notes.iter().map(|viewers| viewers.len()).sum()
    }
}

fn sorted_infos(viewers: &HashMap<UserId, ViewerEntry>) -> Vec<UserInfo> {
    let mut infos: Vec<UserInfo> = viewers.values().map(|entry| entry.info.clone()).collect();
    infos.sort_by(|a, b| {
        a.username
            .cmp(&b.username)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    infos
}
