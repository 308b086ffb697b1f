//! Process-wide room table.
//!
//! Rooms are created on demand on first join and torn down by a deferred
//! eviction that re-checks emptiness at fire time. The registry is the only
//! structure shared across rooms; everything per-room lives inside the room
//! task, reached through its inbox.

use crate::room::{self, JoinRequest, RoomCommand};
use dashmap::DashMap;
use puzzleroom_protocol::RoomKey;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Depth of each room's command inbox. A full inbox drops the event rather
/// than blocking the transport.
const ROOM_INBOX_DEPTH: usize = 256;

struct RoomEntry {
    inbox: mpsc::Sender<RoomCommand>,
}

struct Inner {
    rooms: DashMap<RoomKey, RoomEntry>,
    empty_grace: Duration,
}

/// Shared handle to the room table. Cheap to clone; one lives in every
/// connection session and every room task.
#[derive(Clone)]
pub struct RoomRegistry {
    inner: Arc<Inner>,
}

impl RoomRegistry {
    /// `empty_grace` is how long a room may sit empty before eviction.
    pub fn new(empty_grace: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                rooms: DashMap::new(),
                empty_grace,
            }),
        }
    }

    pub fn empty_grace(&self) -> Duration {
        self.inner.empty_grace
    }

    /// Get-or-create the room's inbox. The dashmap entry API makes creation
    /// atomic: two concurrent joins for an unseen key spawn exactly one room.
    fn room_inbox(&self, key: &RoomKey) -> mpsc::Sender<RoomCommand> {
        self.inner
            .rooms
            .entry(key.clone())
            .or_insert_with(|| {
                let (inbox, rx) = mpsc::channel(ROOM_INBOX_DEPTH);
                tracing::info!(room = %key, "room created");
                tokio::spawn(room::run_room(key.clone(), self.clone(), rx));
                RoomEntry { inbox }
            })
            .inbox
            .clone()
    }

    /// Route a join into the room, creating it if absent. If the send races
    /// with an eviction that already closed the inbox, the stale entry is
    /// dropped and the join retried against a fresh room.
    pub fn join(&self, key: &RoomKey, request: JoinRequest) {
        let mut command = RoomCommand::Join(request);
        loop {
            match self.room_inbox(key).try_send(command) {
                Ok(()) => return,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(room = %key, "room inbox full, join dropped");
                    return;
                }
                Err(TrySendError::Closed(returned)) => {
                    command = returned;
                    self.inner
                        .rooms
                        .remove_if(key, |_, entry| entry.inbox.is_closed());
                }
            }
        }
    }

    /// Fire-and-forget a command into an existing room. A missing or already
    /// evicted room is a no-op, which tolerates events racing a teardown.
    pub fn dispatch(&self, key: &RoomKey, command: RoomCommand) {
        let Some(inbox) = self.inner.rooms.get(key).map(|e| e.inbox.clone()) else {
            return;
        };
        match inbox.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(room = %key, "room inbox full, event dropped");
            }
            Err(TrySendError::Closed(_)) => {
                // Raced with eviction; no-op.
            }
        }
    }

    /// Remove a room entry. Safe no-op if already removed.
    pub fn delete(&self, key: &RoomKey) {
        if self.inner.rooms.remove(key).is_some() {
            tracing::debug!(room = %key, "room removed from registry");
        }
    }

    /// After `delay`, enqueue an eviction check into the room's inbox. The
    /// room re-validates emptiness when the check is processed, so a
    /// participant returning during the window cancels it implicitly.
    pub fn schedule_eviction(&self, key: RoomKey, delay: Duration) {
        let registry = self.clone();
        tracing::debug!(room = %key, ?delay, "eviction scheduled");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            registry.dispatch(&key, RoomCommand::Sweep);
        });
    }

    /// Whether a room currently exists (exposed for tests and diagnostics).
    pub fn contains(&self, key: &RoomKey) -> bool {
        self.inner.rooms.contains_key(key)
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        self.inner.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use puzzleroom_protocol::{ConnectionId, ServerEvent};

    fn join_conn(registry: &RoomRegistry, key: &RoomKey, id: u64) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(64);
        registry.join(
            key,
            JoinRequest {
                conn: ConnectionId(id),
                name: None,
                outbound: tx,
            },
        );
        rx
    }

    async fn recv_event(rx: &mut mpsc::Receiver<String>) -> ServerEvent {
        let frame = rx.recv().await.expect("expected a frame");
        ServerEvent::decode(&frame).expect("frame decodes")
    }

    #[tokio::test]
    async fn join_creates_room_once() {
        let registry = RoomRegistry::new(Duration::from_secs(300));
        let key: RoomKey = "r1".into();

        let mut rx_a = join_conn(&registry, &key, 1);
        let mut rx_b = join_conn(&registry, &key, 2);

        assert!(matches!(
            recv_event(&mut rx_a).await,
            ServerEvent::RoomState { .. }
        ));
        assert!(matches!(
            recv_event(&mut rx_b).await,
            ServerEvent::RoomState { .. }
        ));
        assert_eq!(registry.room_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_room_is_evicted_after_grace() {
        let registry = RoomRegistry::new(Duration::from_secs(300));
        let key: RoomKey = "r1".into();

        let mut rx = join_conn(&registry, &key, 1);
        assert!(matches!(
            recv_event(&mut rx).await,
            ServerEvent::RoomState { .. }
        ));

        registry.dispatch(
            &key,
            RoomCommand::Disconnect {
                conn: ConnectionId(1),
            },
        );
        // connection closed; the sweep should fire 5 minutes later
        drop(rx);
        tokio::time::sleep(Duration::from_secs(301)).await;
        // paused clock: this only returns once all ready tasks have quiesced
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(!registry.contains(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn rejoin_during_grace_cancels_eviction() {
        let registry = RoomRegistry::new(Duration::from_secs(300));
        let key: RoomKey = "r1".into();

        let mut rx = join_conn(&registry, &key, 1);
        assert!(matches!(
            recv_event(&mut rx).await,
            ServerEvent::RoomState { .. }
        ));
        registry.dispatch(
            &key,
            RoomCommand::Disconnect {
                conn: ConnectionId(1),
            },
        );
        drop(rx);

        tokio::time::sleep(Duration::from_secs(100)).await;
        let mut rx2 = join_conn(&registry, &key, 2);
        assert!(matches!(
            recv_event(&mut rx2).await,
            ServerEvent::RoomState { .. }
        ));

        // the original sweep fires at t=300 but must find the room occupied
        tokio::time::sleep(Duration::from_secs(300)).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(registry.contains(&key));
    }

    #[tokio::test]
    async fn delete_is_a_noop_for_missing_rooms() {
        let registry = RoomRegistry::new(Duration::from_secs(300));
        registry.delete(&"nope".into());
        assert_eq!(registry.room_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn join_after_eviction_finds_a_fresh_room() {
        let registry = RoomRegistry::new(Duration::from_secs(300));
        let key: RoomKey = "r1".into();

        let mut rx = join_conn(&registry, &key, 1);
        assert!(matches!(
            recv_event(&mut rx).await,
            ServerEvent::RoomState { .. }
        ));
        registry.dispatch(
            &key,
            RoomCommand::Disconnect {
                conn: ConnectionId(1),
            },
        );
        drop(rx);
        tokio::time::sleep(Duration::from_secs(301)).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!registry.contains(&key));

        let mut rx2 = join_conn(&registry, &key, 2);
        match recv_event(&mut rx2).await {
            ServerEvent::RoomState { users, image, .. } => {
                assert_eq!(users.len(), 1);
                assert!(image.is_none());
            }
            other => panic!("expected room-state, got {other:?}"),
        }
    }
}
