//! Per-note broadcast rooms
//!
//! Every note with at least one subscriber has a broadcast channel. Events
//! carry the connection they originated from so that subscribers can skip
//! their own content updates.

use dashmap::DashMap;
use tokio::sync::broadcast;

use super::protocol::{ConnectionId, NoteId, ServerMessage};

/// Broadcast channel capacity per room
const BROADCAST_CAPACITY: usize = 256;

/// A message published to a room
#[derive(Debug, Clone)]
pub struct RoomEvent {
    /// Connection that caused the event, if it should not receive it back
    pub origin: Option<ConnectionId>,
    pub message: ServerMessage,
}

impl RoomEvent {
    /// Whether `connection_id` should receive this event
    pub fn is_for(&self, connection_id: ConnectionId) -> bool {
        self.origin != Some(connection_id)
    }
}

/// Registry of room broadcast channels, keyed by note
#[derive(Default)]
pub struct RoomHub {
    rooms: DashMap<NoteId, broadcast::Sender<RoomEvent>>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a note's room, creating the room if needed
    pub fn subscribe(&self, note_id: NoteId) -> broadcast::Receiver<RoomEvent> {
        self.rooms
            .entry(note_id)
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
            .subscribe()
    }

    /// Broadcast a message to every subscriber of the room
    pub fn broadcast(&self, note_id: NoteId, message: ServerMessage) {
        self.publish(note_id, RoomEvent { origin: None, message });
    }

    /// Broadcast a message to every subscriber except `origin`
    pub fn broadcast_from(&self, note_id: NoteId, origin: ConnectionId, message: ServerMessage) {
        let origin = Some(origin);
        self.publish(note_id, RoomEvent { origin, message });
    }

    fn publish(&self, note_id: NoteId, event: RoomEvent) {
        if let Some(tx) = self.rooms.get(&note_id) {
            // No receivers is not an error: the room is just quiet
            let _ = tx.send(event);
        }
    }

    /// Number of live subscriptions for a note
    pub fn subscriber_count(&self, note_id: &NoteId) -> usize {
        self.rooms
            .get(note_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Number of rooms currently allocated
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Drop rooms nobody listens to anymore
    pub fn cleanup_empty_rooms(&self) -> usize {
        let before = self.rooms.len();
        self.rooms.retain(|_, tx| tx.receiver_count() > 0);
        before - self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_broadcast_reaches_subscribers() {
        let hub = RoomHub::new();
        let note_id = Uuid::new_v4();
        let mut rx1 = hub.subscribe(note_id);
        let mut rx2 = hub.subscribe(note_id);

        hub.broadcast(note_id, ServerMessage::LockReleased { note_id });

        assert!(matches!(
            rx1.try_recv().unwrap().message,
            ServerMessage::LockReleased { .. }
        ));
        assert!(matches!(
            rx2.try_recv().unwrap().message,
            ServerMessage::LockReleased { .. }
        ));
    }

    #[test]
    fn test_broadcast_from_marks_origin() {
        let hub = RoomHub::new();
        let note_id = Uuid::new_v4();
        let origin = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut rx = hub.subscribe(note_id);

        hub.broadcast_from(
            note_id,
            origin,
            ServerMessage::ContentUpdated {
                note_id,
                content: "hi".to_string(),
            },
        );

        let event = rx.try_recv().unwrap();
        assert!(!event.is_for(origin));
        assert!(event.is_for(other));
    }

    #[test]
    fn test_broadcast_without_room_is_noop() {
        let hub = RoomHub::new();
        let note_id = Uuid::new_v4();

        hub.broadcast(note_id, ServerMessage::LockReleased { note_id });

        assert_eq!(hub.room_count(), 0);
    }

    #[test]
    fn test_rooms_are_isolated() {
        let hub = RoomHub::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut rx_a = hub.subscribe(a);
        let _rx_b = hub.subscribe(b);

        hub.broadcast(b, ServerMessage::LockReleased { note_id: b });

        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_cleanup_empty_rooms() {
        let hub = RoomHub::new();
        let kept = Uuid::new_v4();
        let dropped = Uuid::new_v4();
        let _rx = hub.subscribe(kept);
        drop(hub.subscribe(dropped));

        assert_eq!(hub.subscriber_count(&dropped), 0);
        assert_eq!(hub.cleanup_empty_rooms(), 1);
        assert_eq!(hub.room_count(), 1);
        assert_eq!(hub.subscriber_count(&kept), 1);
    }
}
