//! End-to-end scenarios for the collaboration coordinator
//!
//! These drive several connections through one [`Coordinator`] and check what
//! each of them observes on its room receiver.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::broadcast;
    use uuid::Uuid;

    use crate::core::collab::coordinator::Coordinator;
    use crate::core::collab::hub::RoomEvent;
    use crate::core::collab::lock::{AcquireOutcome, DEFAULT_LOCK_TIMEOUT};
    use crate::core::collab::propagator::SubmitOutcome;
    use crate::core::collab::protocol::{ConnectionId, NoteId, ServerMessage, UserId, UserInfo};
    use crate::core::collab::store::{MemoryNoteStore, NoteStore, StoreError};
    use crate::core::collab::CollabError;
    use crate::core::db::models::{CreateNote, Note};

    /// Memory store whose saves can be made to fail
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryNoteStore,
        fail_saves: AtomicBool,
    }

    #[async_trait]
    impl NoteStore for FlakyStore {
        async fn load_note(&self, note_id: NoteId) -> Result<Option<Note>, StoreError> {
            self.inner.load_note(note_id).await
        }

        async fn save_note_content(&self, note_id: NoteId, content: &str) -> Result<(), StoreError> {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("connection reset".to_string()));
            }
            self.inner.save_note_content(note_id, content).await
        }

        async fn set_lock_owner(
            &self,
            note_id: NoteId,
            holder: Option<UserId>,
        ) -> Result<(), StoreError> {
            self.inner.set_lock_owner(note_id, holder).await
        }

        async fn create_note(&self, owner_id: UserId, data: CreateNote) -> Result<Note, StoreError> {
            self.inner.create_note(owner_id, data).await
        }
    }

    /// One connection joined to the scenario's note
    struct Peer {
        conn: ConnectionId,
        user: UserInfo,
        events: broadcast::Receiver<RoomEvent>,
    }

    impl Peer {
        /// Room messages this connection would be sent, in order
        fn drain(&mut self) -> Vec<ServerMessage> {
            let mut messages = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                if event.is_for(self.conn) {
                    messages.push(event.message);
                }
            }
            messages
        }
    }

    struct Scenario {
        coordinator: Coordinator,
        store: Arc<FlakyStore>,
        note_id: NoteId,
        editors: Vec<UserInfo>,
    }

    impl Scenario {
        /// A note owned by the first of `editors`, editable by all of them
        fn new(editors: &[&str]) -> Self {
            let editors: Vec<UserInfo> = editors
                .iter()
                .map(|name| UserInfo::new(Uuid::new_v4(), *name))
                .collect();
            let note = Note::new(
                editors[0].user_id,
                CreateNote {
                    title: "Standup".to_string(),
                    content: "initial".to_string(),
                    collaborators: editors[1..].iter().map(|u| u.user_id).collect(),
                    ..Default::default()
                },
            );
            let note_id = note.id;
            let store = Arc::new(FlakyStore::default());
            store.inner.insert(note);

            Self {
                coordinator: Coordinator::new(store.clone(), DEFAULT_LOCK_TIMEOUT),
                store,
                note_id,
                editors,
            }
        }

        async fn join(&self, index: usize) -> Peer {
            self.join_as(self.editors[index].clone()).await
        }

        async fn join_as(&self, user: UserInfo) -> Peer {
            let conn = Uuid::new_v4();
            let joined = self
                .coordinator
                .on_join(conn, &user, self.note_id)
                .await
                .unwrap();
            Peer {
                conn,
                user,
                events: joined.receiver,
            }
        }

        async fn submit(&self, peer: &Peer, content: &str) -> Result<SubmitOutcome, CollabError> {
            self.coordinator
                .content_change(peer.conn, self.note_id, content.to_string())
                .await
        }

        fn content(&self) -> String {
            self.store.inner.get(&self.note_id).unwrap().content
        }

        async fn holder(&self) -> Option<UserId> {
            self.coordinator
                .locks()
                .holder(self.note_id)
                .await
                .map(|holder| holder.user.user_id)
        }
    }

    fn content_updates(messages: &[ServerMessage]) -> Vec<String> {
        messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::ContentUpdated { content, .. } => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    // ========================================================================
    // Locking
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_only_one_holder_among_competing_editors() {
        let s = Scenario::new(&["alice", "bob", "carol"]);
        let alice = s.join(0).await;
        let bob = s.join(1).await;
        let carol = s.join(2).await;

        let first = s.coordinator.acquire_lock(alice.conn, s.note_id).await.unwrap();
        let second = s.coordinator.acquire_lock(bob.conn, s.note_id).await.unwrap();
        let third = s.coordinator.acquire_lock(carol.conn, s.note_id).await.unwrap();

        assert!(first.is_granted());
        assert_eq!(
            second,
            AcquireOutcome::HeldBy {
                holder: alice.user.clone()
            }
        );
        assert_eq!(
            third,
            AcquireOutcome::HeldBy {
                holder: alice.user.clone()
            }
        );
        assert_eq!(s.holder().await, Some(alice.user.user_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_content_changes_keep_lock_alive() {
        let s = Scenario::new(&["alice", "bob"]);
        let alice = s.join(0).await;
        let mut bob = s.join(1).await;
        s.coordinator.acquire_lock(alice.conn, s.note_id).await.unwrap();

        for i in 0..5 {
            tokio::time::sleep(DEFAULT_LOCK_TIMEOUT - Duration::from_millis(100)).await;
            let outcome = s.submit(&alice, &format!("revision {}", i)).await.unwrap();
            assert_eq!(outcome, SubmitOutcome::Accepted);
        }

        assert_eq!(s.holder().await, Some(alice.user.user_id));
        assert!(
            !bob.drain()
                .iter()
                .any(|m| matches!(m, ServerMessage::LockReleased { .. }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_lock_is_reclaimed() {
        let s = Scenario::new(&["alice", "bob"]);
        let alice = s.join(0).await;
        let mut bob = s.join(1).await;
        s.coordinator.acquire_lock(alice.conn, s.note_id).await.unwrap();

        tokio::time::sleep(DEFAULT_LOCK_TIMEOUT + Duration::from_millis(1)).await;

        assert!(
            bob.drain()
                .iter()
                .any(|m| matches!(m, ServerMessage::LockReleased { .. }))
        );
        let outcome = s.coordinator.acquire_lock(bob.conn, s.note_id).await.unwrap();
        assert!(outcome.is_granted());

        let late = s.submit(&alice, "too late").await.unwrap();
        assert_eq!(
            late,
            SubmitOutcome::Rejected {
                holder: Some(bob.user.clone())
            }
        );
        assert_eq!(s.content(), "initial");
    }

    // ========================================================================
    // Content changes
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_change_from_non_holder_has_no_effect() {
        let s = Scenario::new(&["alice", "bob"]);
        let mut alice = s.join(0).await;
        let bob = s.join(1).await;
        s.coordinator.acquire_lock(alice.conn, s.note_id).await.unwrap();
        alice.drain();

        let outcome = s.submit(&bob, "hijacked").await.unwrap();

        assert_eq!(
            outcome,
            SubmitOutcome::Rejected {
                holder: Some(alice.user.clone())
            }
        );
        assert_eq!(s.content(), "initial");
        assert!(content_updates(&alice.drain()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_changes_arrive_in_submission_order() {
        let s = Scenario::new(&["alice", "bob"]);
        let mut alice = s.join(0).await;
        let mut bob = s.join(1).await;
        s.coordinator.acquire_lock(alice.conn, s.note_id).await.unwrap();

        s.submit(&alice, "first").await.unwrap();
        s.submit(&alice, "second").await.unwrap();
        s.submit(&alice, "third").await.unwrap();

        assert_eq!(content_updates(&bob.drain()), vec!["first", "second", "third"]);
        assert!(content_updates(&alice.drain()).is_empty());
        assert_eq!(s.content(), "third");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_can_be_retried() {
        let s = Scenario::new(&["alice", "bob"]);
        let alice = s.join(0).await;
        let mut bob = s.join(1).await;
        s.coordinator.acquire_lock(alice.conn, s.note_id).await.unwrap();
        bob.drain();

        s.store.fail_saves.store(true, Ordering::SeqCst);
        let result = s.submit(&alice, "lost").await;

        assert!(matches!(result, Err(CollabError::SaveFailed { .. })));
        assert!(!result.unwrap_err().is_terminal());
        assert_eq!(s.content(), "initial");
        assert!(bob.drain().is_empty());
        assert_eq!(s.holder().await, Some(alice.user.user_id));
        assert!(s.coordinator.binding(alice.conn).is_some());

        s.store.fail_saves.store(false, Ordering::SeqCst);
        let retry = s.submit(&alice, "lost").await.unwrap();

        assert_eq!(retry, SubmitOutcome::Accepted);
        assert_eq!(s.content(), "lost");
        assert_eq!(content_updates(&bob.drain()), vec!["lost"]);
    }

    // ========================================================================
    // Membership
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_releases_lock_and_membership() {
        let s = Scenario::new(&["alice", "bob"]);
        let alice = s.join(0).await;
        let mut bob = s.join(1).await;
        s.coordinator.acquire_lock(alice.conn, s.note_id).await.unwrap();
        bob.drain();

        s.coordinator.on_disconnect(alice.conn).await;

        let messages = bob.drain();
        assert!(matches!(
            messages.as_slice(),
            [
                ServerMessage::LockReleased { .. },
                ServerMessage::ViewersUpdated { viewers, .. }
            ] if viewers == &vec![bob.user.clone()]
        ));
        let outcome = s.coordinator.acquire_lock(bob.conn, s.note_id).await.unwrap();
        assert!(outcome.is_granted());
        assert_eq!(s.coordinator.connection_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_and_leave_are_idempotent() {
        let s = Scenario::new(&["alice", "bob"]);
        let alice = s.join(0).await;
        let mut bob = s.join(1).await;

        s.coordinator
            .on_join(alice.conn, &alice.user, s.note_id)
            .await
            .unwrap();
        assert_eq!(
            s.coordinator.sessions().current_viewers(&s.note_id).len(),
            2
        );
        bob.drain();

        let stranger = Uuid::new_v4();
        assert!(!s.coordinator.on_leave(stranger, s.note_id).await);
        assert!(s.coordinator.on_leave(alice.conn, s.note_id).await);
        assert!(!s.coordinator.on_leave(alice.conn, s.note_id).await);

        let updates: Vec<_> = bob
            .drain()
            .into_iter()
            .filter(|m| matches!(m, ServerMessage::ViewersUpdated { .. }))
            .collect();
        assert_eq!(updates.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_tab_keeps_user_present_and_lock_held() {
        let s = Scenario::new(&["alice", "bob"]);
        let first_tab = s.join(0).await;
        let second_tab = s.join(0).await;
        let mut bob = s.join(1).await;
        s.coordinator
            .acquire_lock(first_tab.conn, s.note_id)
            .await
            .unwrap();
        bob.drain();

        s.coordinator.on_disconnect(second_tab.conn).await;

        assert!(bob.drain().is_empty());
        assert_eq!(s.holder().await, Some(first_tab.user.user_id));
        assert!(
            s.coordinator
                .sessions()
                .is_viewer(&s.note_id, &first_tab.user.user_id)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_follows_tab_that_keeps_editing() {
        let s = Scenario::new(&["alice", "bob"]);
        let first_tab = s.join(0).await;
        let second_tab = s.join(0).await;
        let mut bob = s.join(1).await;
        s.coordinator
            .acquire_lock(first_tab.conn, s.note_id)
            .await
            .unwrap();
        assert_eq!(
            s.submit(&second_tab, "typed in tab two").await.unwrap(),
            SubmitOutcome::Accepted
        );
        bob.drain();

        s.coordinator.on_disconnect(first_tab.conn).await;

        assert_eq!(s.holder().await, Some(second_tab.user.user_id));
        assert!(
            !bob.drain()
                .iter()
                .any(|m| matches!(m, ServerMessage::LockReleased { .. }))
        );
        assert_eq!(
            s.submit(&second_tab, "still editing").await.unwrap(),
            SubmitOutcome::Accepted
        );
        assert_eq!(s.content(), "still editing");

        s.coordinator.on_disconnect(second_tab.conn).await;
        assert!(s.holder().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_notes_releases_previous_lock() {
        let s = Scenario::new(&["alice", "bob"]);
        let alice = s.join(0).await;
        let mut bob = s.join(1).await;
        s.coordinator.acquire_lock(alice.conn, s.note_id).await.unwrap();
        bob.drain();

        let other = s
            .store
            .create_note(alice.user.user_id, CreateNote::default())
            .await
            .unwrap();
        s.coordinator
            .on_join(alice.conn, &alice.user, other.id)
            .await
            .unwrap();

        assert!(s.holder().await.is_none());
        assert!(
            bob.drain()
                .iter()
                .any(|m| matches!(m, ServerMessage::LockReleased { .. }))
        );
        assert_eq!(s.coordinator.binding(alice.conn).unwrap().note_id, other.id);
    }
}
