//! Exclusive edit locks for notes
//!
//! Each note has at most one lock holder. The lock is advisory: it is only
//! enforced by this module's checks, not by the storage layer, and it does not
//! survive a restart.
//!
//! State machine per note:
//!
//! ```text
//! Unlocked --acquire--> Locked(a) --release/timeout/disconnect--> Unlocked
//! Locked(a) --acquire by b after a was inactive past the timeout--> Locked(b)
//! ```
//!
//! Every grant, renewal and release bumps the record's `generation`. The
//! inactivity timer captures the generation it was scheduled for and does
//! nothing if it no longer matches when it fires.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::hub::RoomHub;
use super::protocol::{ConnectionId, NoteId, ServerMessage, UserId, UserInfo};
use super::store::NoteStore;

// ============================================================================
// Constants
// ============================================================================

/// Inactivity window after which an unrenewed lock is reclaimed
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Lock Records
// ============================================================================

/// The current owner of a note's lock
#[derive(Debug, Clone)]
pub struct LockHolder {
    pub user: UserInfo,
    /// Connection the lock was taken or last renewed through
    pub connection_id: ConnectionId,
    /// Wall-clock time of the last acquisition or renewal
    pub locked_at: DateTime<Utc>,
}

/// Lock state for a single note
#[derive(Debug)]
pub struct LockRecord {
    holder: Option<LockHolder>,
    acquired_at: Instant,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl LockRecord {
    fn new() -> Self {
        Self {
            holder: None,
            acquired_at: Instant::now(),
            generation: 0,
            timer: None,
        }
    }

    pub fn holder(&self) -> Option<&LockHolder> {
        self.holder.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_held_by(&self, user_id: UserId) -> bool {
        self.holder
            .as_ref()
            .is_some_and(|holder| holder.user.user_id == user_id)
    }

    /// First half of the validate-then-renew contract
    pub fn check_holder(&self, user_id: UserId) -> Result<&LockHolder, LockError> {
        match &self.holder {
            Some(holder) if holder.user.user_id == user_id => Ok(holder),
            other => Err(LockError::NotHolder {
                holder: other.as_ref().map(|holder| holder.user.clone()),
            }),
        }
    }

    fn is_expired(&self, timeout: Duration) -> bool {
        self.holder.is_some() && self.acquired_at.elapsed() > timeout
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Clear the holder and invalidate any pending timer
    fn clear(&mut self) -> Option<LockHolder> {
        self.cancel_timer();
        self.generation += 1;
        self.holder.take()
    }
}

/// Guard over a note's lock record. Holding it serializes every lock
/// transition for that note.
pub type LockGuard = OwnedMutexGuard<LockRecord>;

/// Lock errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("Caller does not hold the lock")]
    NotHolder { holder: Option<UserInfo> },
}

/// Result of a lock request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The requester is the new holder. `previous` is set when an inactive
    /// holder was displaced.
    Granted {
        holder: UserInfo,
        previous: Option<UserInfo>,
    },
    /// The requester already held the lock and it was renewed
    Renewed { holder: UserInfo },
    /// Someone else holds the lock and is still active
    HeldBy { holder: UserInfo },
}

impl AcquireOutcome {
    pub fn is_granted(&self) -> bool {
        !matches!(self, AcquireOutcome::HeldBy { .. })
    }
}

// ============================================================================
// Lock Manager
// ============================================================================

/// Owns the lock records of every note
pub struct LockManager {
    records: DashMap<NoteId, Arc<Mutex<LockRecord>>>,
    timeout: Duration,
    hub: Arc<RoomHub>,
    store: Arc<dyn NoteStore>,
}

impl LockManager {
    pub fn new(hub: Arc<RoomHub>, store: Arc<dyn NoteStore>, timeout: Duration) -> Self {
        Self {
            records: DashMap::new(),
            timeout,
            hub,
            store,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Lock a note's record, creating it on first use
    pub async fn lock_record(&self, note_id: NoteId) -> LockGuard {
        let record = self
            .records
            .entry(note_id)
            .or_insert_with(|| Arc::new(Mutex::new(LockRecord::new())))
            .clone();
        record.lock_owned().await
    }

    /// Lock a note's record only if it exists
    async fn existing_record(&self, note_id: NoteId) -> Option<LockGuard> {
        let record = self.records.get(&note_id).map(|r| r.clone())?;
        Some(record.lock_owned().await)
    }

    /// Request the lock for `user`.
    ///
    /// Grants when the note is unlocked, renews when `user` already holds it,
    /// takes over when the current holder has been inactive for longer than
    /// the timeout, and otherwise reports the current holder without changing
    /// anything.
    pub async fn acquire(
        self: &Arc<Self>,
        note_id: NoteId,
        user: &UserInfo,
        connection_id: ConnectionId,
    ) -> AcquireOutcome {
        let mut record = self.lock_record(note_id).await;

        let previous = match &record.holder {
            Some(current) if current.user.user_id != user.user_id => {
                if !record.is_expired(self.timeout) {
                    tracing::debug!(
                        note_id = %note_id,
                        user_id = %user.user_id,
                        holder_id = %current.user.user_id,
                        "Lock request rejected, note is locked"
                    );
                    return AcquireOutcome::HeldBy {
                        holder: current.user.clone(),
                    };
                }
                tracing::info!(
                    note_id = %note_id,
                    user_id = %user.user_id,
                    previous_id = %current.user.user_id,
                    "Taking over lock from inactive holder"
                );
                Some(current.user.clone())
            }
            _ => None,
        };
        let renewed = record.is_held_by(user.user_id);

        record.holder = Some(LockHolder {
            user: user.clone(),
            connection_id,
            locked_at: Utc::now(),
        });
        self.touch(&mut record, note_id);

        if !renewed {
            self.mirror_lock_owner(note_id, Some(user.user_id)).await;
            tracing::info!(note_id = %note_id, user_id = %user.user_id, "Lock acquired");
        }
        self.hub.broadcast(
            note_id,
            ServerMessage::LockAcquired {
                note_id,
                holder: user.clone(),
            },
        );

        if renewed {
            AcquireOutcome::Renewed {
                holder: user.clone(),
            }
        } else {
            AcquireOutcome::Granted {
                holder: user.clone(),
                previous,
            }
        }
    }

    /// Check that `user_id` currently holds the lock
    pub async fn validate_holder(
        &self,
        note_id: NoteId,
        user_id: UserId,
    ) -> Result<LockHolder, LockError> {
        match self.existing_record(note_id).await {
            Some(record) => record.check_holder(user_id).cloned(),
            None => Err(LockError::NotHolder { holder: None }),
        }
    }

    /// Reset the inactivity timer after accepted activity by the holder.
    ///
    /// The lock moves to `connection_id`, so closing the tab it was first
    /// taken in does not release a lock still being used from another one.
    pub async fn renew_on_activity(
        self: &Arc<Self>,
        note_id: NoteId,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Result<(), LockError> {
        let mut record = self.lock_record(note_id).await;
        self.renew_locked(&mut record, note_id, user_id, connection_id)
    }

    /// Same as [`renew_on_activity`](Self::renew_on_activity) for a caller
    /// already holding the record guard
    pub fn renew_locked(
        self: &Arc<Self>,
        record: &mut LockRecord,
        note_id: NoteId,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Result<(), LockError> {
        record.check_holder(user_id)?;
        if let Some(holder) = record.holder.as_mut() {
            holder.connection_id = connection_id;
            holder.locked_at = Utc::now();
        }
        self.touch(record, note_id);
        Ok(())
    }

    /// Release the lock if `user_id` holds it. Returns whether anything
    /// was released; releasing a lock one does not hold is a no-op.
    pub async fn release(&self, note_id: NoteId, user_id: UserId) -> bool {
        let Some(mut record) = self.existing_record(note_id).await else {
            return false;
        };

        if !record.is_held_by(user_id) {
            tracing::debug!(
                note_id = %note_id,
                user_id = %user_id,
                "Ignoring release from non-holder"
            );
            return false;
        }

        record.clear();
        self.finish_release(note_id).await;
        tracing::info!(note_id = %note_id, user_id = %user_id, "Lock released");
        true
    }

    /// Release the lock if it was taken or last renewed through
    /// `connection_id`
    pub async fn release_from(&self, note_id: NoteId, connection_id: ConnectionId) -> bool {
        let Some(mut record) = self.existing_record(note_id).await else {
            return false;
        };

        let held_here = record
            .holder
            .as_ref()
            .is_some_and(|holder| holder.connection_id == connection_id);
        if !held_here {
            return false;
        }

        if let Some(previous) = record.clear() {
            tracing::info!(
                note_id = %note_id,
                user_id = %previous.user.user_id,
                connection_id = %connection_id,
                "Lock released with its connection"
            );
        }
        self.finish_release(note_id).await;
        true
    }

    /// Release every lock taken through a connection. Returns the notes that
    /// were unlocked.
    pub async fn release_connection(&self, connection_id: ConnectionId) -> Vec<NoteId> {
        let note_ids: Vec<NoteId> = self.records.iter().map(|entry| *entry.key()).collect();

        let mut released = Vec::new();
        for note_id in note_ids {
            if self.release_from(note_id, connection_id).await {
                released.push(note_id);
            }
        }
        released
    }

    /// Current holder of a note's lock
    pub async fn holder(&self, note_id: NoteId) -> Option<LockHolder> {
        self.existing_record(note_id)
            .await
            .and_then(|record| record.holder.clone())
    }

    /// Drop records of unlocked notes that nobody is using
    pub fn prune_released(&self) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| {
            Arc::strong_count(record) > 1
                || record
                    .try_lock()
                    .map(|record| record.holder.is_some())
                    .unwrap_or(true)
        });
        before - self.records.len()
    }

    /// Number of notes currently locked
    pub fn locked_count(&self) -> usize {
        self.records
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .try_lock()
                    .map(|record| record.holder.is_some())
                    .unwrap_or(true)
            })
            .count()
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Stamp a (re)acquisition and reschedule the inactivity timer
    fn touch(self: &Arc<Self>, record: &mut LockRecord, note_id: NoteId) {
        record.acquired_at = Instant::now();
        record.generation += 1;
        record.cancel_timer();

        let generation = record.generation;
        let timeout = self.timeout;
        let manager = Arc::downgrade(self);
        record.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(manager) = manager.upgrade() {
                manager.expire(note_id, generation).await;
            }
        }));
    }

    /// Inactivity timer callback
    async fn expire(&self, note_id: NoteId, generation: u64) {
        let Some(mut record) = self.existing_record(note_id).await else {
            return;
        };

        if record.generation != generation || record.holder.is_none() {
            tracing::debug!(note_id = %note_id, generation, "Ignoring stale lock timer");
            return;
        }

        // This task is the timer; detach rather than abort it
        record.timer.take();
        record.generation += 1;
        let previous = record.holder.take();

        self.finish_release(note_id).await;
        if let Some(previous) = previous {
            tracing::info!(
                note_id = %note_id,
                user_id = %previous.user.user_id,
                "Lock released after inactivity"
            );
        }
    }

    async fn finish_release(&self, note_id: NoteId) {
        self.mirror_lock_owner(note_id, None).await;
        self.hub
            .broadcast(note_id, ServerMessage::LockReleased { note_id });
    }

    async fn mirror_lock_owner(&self, note_id: NoteId, holder: Option<UserId>) {
        if let Err(e) = self.store.set_lock_owner(note_id, holder).await {
            tracing::warn!(note_id = %note_id, error = %e, "Failed to persist lock owner");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
