//! Per-room authoritative state and the room task.
//!
//! One task per room owns its `RoomState` exclusively and drains an ordered
//! inbox of commands, so all mutation of a room is serialized while separate
//! rooms proceed independently. Nothing here ever blocks on another
//! participant: every command is handled to completion (validate, mutate,
//! fan out) before the next is read.

use crate::locks::{Claim, GroupLocks};
use crate::palette;
use crate::registry::RoomRegistry;
use puzzleroom_protocol::{
    ClientEvent, ConnectionId, GroupMap, Participant, PieceMap, RoomKey, ServerEvent,
};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Cap on participants per room. The original coordinator imposed none;
/// joins beyond the cap are dropped.
pub const MAX_PARTICIPANTS: usize = 32;

/// Commands consumed by a room task.
#[derive(Debug)]
pub enum RoomCommand {
    /// A connection joins (or rejoins) the room.
    Join(JoinRequest),
    /// An event from a connection that already joined.
    Client {
        from: ConnectionId,
        event: ClientEvent,
    },
    /// The connection dropped or left for another room.
    Disconnect { conn: ConnectionId },
    /// Deferred eviction check. Enqueued by the registry when the empty-room
    /// grace period elapses; the room decides at processing time.
    Sweep,
}

/// Join data carried into the room task.
#[derive(Debug)]
pub struct JoinRequest {
    pub conn: ConnectionId,
    pub name: Option<String>,
    /// Sink for outbound frames to this connection.
    pub outbound: mpsc::Sender<String>,
}

/// The puzzle image payload plus its configuration, opaque to the server.
struct PuzzleImage {
    image: Value,
    puzzle_config: Value,
    uploaded_by: String,
}

struct Member {
    info: Participant,
    outbound: mpsc::Sender<String>,
}

/// Authoritative state of one room.
pub struct RoomState {
    key: RoomKey,
    pieces: PieceMap,
    groups: GroupMap,
    image: Option<PuzzleImage>,
    members: HashMap<ConnectionId, Member>,
    locks: GroupLocks,
}

impl RoomState {
    fn new(key: RoomKey) -> Self {
        Self {
            key,
            pieces: PieceMap::new(),
            groups: GroupMap::new(),
            image: None,
            members: HashMap::new(),
            locks: GroupLocks::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Current participant list, in join order (connection ids are assigned
    /// monotonically).
    fn roster(&self) -> Vec<Participant> {
        let mut users: Vec<_> = self.members.values().map(|m| m.info.clone()).collect();
        users.sort_by_key(|u| u.id);
        users
    }

    // ------------------------------------------------------------------
    // Fan-out helpers: serialize once, clone the frame per recipient.
    // ------------------------------------------------------------------

    fn send_to(&self, conn: ConnectionId, event: &ServerEvent) {
        let Some(member) = self.members.get(&conn) else {
            return;
        };
        if let Ok(frame) = event.encode() {
            // A full outbound queue means a slow reader; drop rather than
            // stall the room.
            let _ = member.outbound.try_send(frame);
        }
    }

    fn broadcast_except(&self, exclude: ConnectionId, event: &ServerEvent) {
        let Ok(frame) = event.encode() else { return };
        for (conn, member) in &self.members {
            if *conn != exclude {
                let _ = member.outbound.try_send(frame.clone());
            }
        }
    }

    fn broadcast_all(&self, event: &ServerEvent) {
        let Ok(frame) = event.encode() else { return };
        for member in self.members.values() {
            let _ = member.outbound.try_send(frame.clone());
        }
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    fn handle_join(&mut self, request: JoinRequest) {
        if self.members.len() >= MAX_PARTICIPANTS {
            tracing::warn!(room = %self.key, conn = request.conn.0, "room full, join dropped");
            return;
        }

        let name = request
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("Player{}", request.conn.0));
        let color = palette::color_for(self.members.len()).to_string();

        // A client that arrives mid-puzzle gets the image first so it can
        // start slicing before the snapshot lands.
        if let Some(image) = &self.image {
            if let Ok(frame) = (ServerEvent::ImageLoaded {
                image: image.image.clone(),
                puzzle_config: image.puzzle_config.clone(),
                uploaded_by: image.uploaded_by.clone(),
                current_positions: self.groups.clone(),
            })
            .encode()
            {
                let _ = request.outbound.try_send(frame);
            }
        }

        let info = Participant {
            id: request.conn,
            name: name.clone(),
            color: color.clone(),
        };
        self.members.insert(
            request.conn,
            Member {
                info,
                outbound: request.outbound,
            },
        );

        self.send_to(
            request.conn,
            &ServerEvent::RoomState {
                pieces: self.pieces.clone(),
                groups: self.groups.clone(),
                image: self.image.as_ref().map(|i| i.image.clone()),
                puzzle_config: self.image.as_ref().map(|i| i.puzzle_config.clone()),
                users: self.roster(),
                your_color: color.clone(),
                your_id: request.conn,
            },
        );

        self.broadcast_except(
            request.conn,
            &ServerEvent::UserJoined {
                id: request.conn,
                name: name.clone(),
                color,
                users: self.roster(),
            },
        );

        tracing::info!(room = %self.key, conn = request.conn.0, name = %name,
            participants = self.members.len(), "joined room");
    }

    fn handle_event(&mut self, from: ConnectionId, event: ClientEvent) {
        // Tolerates late or racing events from a connection that was already
        // removed: silent drop, not an error.
        let Some(member) = self.members.get(&from) else {
            return;
        };
        let user = member.info.clone();

        match event {
            ClientEvent::JoinRoom { .. } => {
                // Joins are routed through the registry, never through the
                // in-room event path.
            }
            ClientEvent::UploadImage {
                image,
                puzzle_config,
            } => {
                // A new puzzle invalidates the previous arrangement.
                self.groups = GroupMap::new();
                self.image = Some(PuzzleImage {
                    image: image.clone(),
                    puzzle_config: puzzle_config.clone(),
                    uploaded_by: user.name.clone(),
                });

                self.broadcast_all(&ServerEvent::ImageLoaded {
                    image,
                    puzzle_config,
                    uploaded_by: user.name.clone(),
                    current_positions: GroupMap::new(),
                });
                tracing::info!(room = %self.key, by = %user.name, "image uploaded");
            }
            ClientEvent::InitPieces { pieces, groups } => {
                self.pieces = pieces.clone();
                self.groups = groups.clone();
                self.broadcast_except(from, &ServerEvent::PiecesInitialized { pieces, groups });
            }
            ClientEvent::DragStart { group_id } => match self.locks.try_claim(&group_id, from) {
                Claim::Granted => {
                    self.broadcast_except(
                        from,
                        &ServerEvent::PieceDragStart {
                            group_id,
                            user_id: from,
                            user_name: user.name,
                            user_color: user.color,
                        },
                    );
                }
                Claim::Denied { holder } => {
                    tracing::debug!(room = %self.key, group = %group_id.0,
                        conn = from.0, holder = holder.0, "drag denied");
                    self.send_to(from, &ServerEvent::DragDenied { group_id });
                }
            },
            ClientEvent::DragMove { group_id, x, y } => {
                // Guard against stale moves after the lock was lost.
                if !self.locks.holds(&group_id, from) {
                    return;
                }
                self.broadcast_except(
                    from,
                    &ServerEvent::PieceMoved {
                        group_id,
                        x,
                        y,
                        user_id: from,
                    },
                );
            }
            ClientEvent::DragEnd {
                group_id,
                x,
                y,
                merged_with,
                updated_groups,
                updated_pieces,
                is_complete,
            } => {
                // Unconditional release, even from a non-holder.
                self.locks.release(&group_id);

                // Last accepted full snapshot wins.
                if let Some(groups) = &updated_groups {
                    self.groups = groups.clone();
                }
                if let Some(pieces) = &updated_pieces {
                    self.pieces = pieces.clone();
                }

                self.broadcast_except(
                    from,
                    &ServerEvent::PieceDragEnd {
                        group_id,
                        x,
                        y,
                        merged_with,
                        updated_groups,
                        updated_pieces,
                        user_id: from,
                    },
                );

                // Client-reported; the server does not verify geometry.
                if is_complete {
                    self.broadcast_all(&ServerEvent::PuzzleComplete {
                        completed_by: user.name.clone(),
                    });
                    tracing::info!(room = %self.key, by = %user.name, "puzzle completed");
                }
            }
            ClientEvent::CursorMove { x, y } => {
                self.broadcast_except(
                    from,
                    &ServerEvent::CursorUpdate {
                        user_id: from,
                        user_name: user.name,
                        user_color: user.color,
                        x,
                        y,
                    },
                );
            }
            ClientEvent::ChatMessage { message } => {
                self.broadcast_all(&ServerEvent::ChatMessage {
                    user_id: from,
                    user_name: user.name,
                    user_color: user.color,
                    message,
                    timestamp: now_millis(),
                });
            }
        }
    }

    /// Remove the connection, release its locks, tell the remainder.
    /// Idempotent: a connection that never joined is a no-op.
    fn handle_disconnect(&mut self, conn: ConnectionId) {
        let Some(member) = self.members.remove(&conn) else {
            return;
        };

        // No per-lock notification: the user-left broadcast is the clients'
        // cue to clear stale lock indicators.
        self.locks.release_all_held_by(conn);

        self.broadcast_all(&ServerEvent::UserLeft {
            id: conn,
            name: member.info.name.clone(),
            users: self.roster(),
        });

        tracing::info!(room = %self.key, conn = conn.0, name = %member.info.name,
            participants = self.members.len(), "left room");
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Room task: drains the inbox until the room is evicted.
pub(crate) async fn run_room(
    key: RoomKey,
    registry: RoomRegistry,
    mut inbox: mpsc::Receiver<RoomCommand>,
) {
    let mut state = RoomState::new(key);

    while let Some(command) = inbox.recv().await {
        match command {
            RoomCommand::Join(request) => state.handle_join(request),
            RoomCommand::Client { from, event } => state.handle_event(from, event),
            RoomCommand::Disconnect { conn } => {
                state.handle_disconnect(conn);
                if state.is_empty() {
                    registry.schedule_eviction(state.key.clone(), registry.empty_grace());
                }
            }
            RoomCommand::Sweep => {
                if !state.is_empty() {
                    // A participant returned during the grace period.
                    tracing::debug!(room = %state.key, "eviction canceled, room repopulated");
                    continue;
                }

                // Stop accepting sends, then drain what was already queued:
                // a join that raced the sweep is re-dispatched to a fresh
                // room rather than silently lost.
                inbox.close();
                registry.delete(&state.key);
                while let Ok(command) = inbox.try_recv() {
                    if let RoomCommand::Join(request) = command {
                        registry.join(&state.key, request);
                    }
                }
                tracing::info!(room = %state.key, "empty room evicted");
                return;
            }
        }
    }
}
