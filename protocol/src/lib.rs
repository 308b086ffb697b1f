//! Wire protocol shared between the puzzleroom server and its clients.
//!
//! Every frame on the wire is a JSON object `{"event": "...", "data": {...}}`
//! with a kebab-case event name and camelCase payload fields. Piece and group
//! payloads are opaque to the coordinator: it stores and relays them by
//! identifier without interpreting geometry.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a live connection. Assigned by the server when a
/// client connects; clients see it as `userId` / `yourId` in events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

/// Client-chosen key identifying a room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomKey(pub String);

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomKey {
    fn from(s: &str) -> Self {
        RoomKey(s.to_string())
    }
}

/// Identifier of a piece group — the unit of drag ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub String);

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        GroupId(s.to_string())
    }
}

/// Identifier of a single puzzle piece.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PieceId(pub String);

/// Piece layout as reported by clients: piece id to opaque piece state.
pub type PieceMap = HashMap<PieceId, Value>;

/// Group layout: group id to opaque group state (members, position).
pub type GroupMap = HashMap<GroupId, Value>;

// ============================================================================
// Participants
// ============================================================================

/// A connected participant as seen by other clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ConnectionId,
    pub name: String,
    pub color: String,
}

// ============================================================================
// Inbound events (client -> server)
// ============================================================================

/// Events sent by clients. Tag and field names match the wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: RoomKey,
        name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    UploadImage { image: Value, puzzle_config: Value },
    #[serde(rename_all = "camelCase")]
    InitPieces { pieces: PieceMap, groups: GroupMap },
    #[serde(rename_all = "camelCase")]
    DragStart { group_id: GroupId },
    #[serde(rename_all = "camelCase")]
    DragMove { group_id: GroupId, x: f64, y: f64 },
    #[serde(rename_all = "camelCase")]
    DragEnd {
        group_id: GroupId,
        x: f64,
        y: f64,
        merged_with: Option<GroupId>,
        updated_groups: Option<GroupMap>,
        updated_pieces: Option<PieceMap>,
        #[serde(default)]
        is_complete: bool,
    },
    #[serde(rename_all = "camelCase")]
    CursorMove { x: f64, y: f64 },
    #[serde(rename_all = "camelCase")]
    ChatMessage { message: String },
}

impl ClientEvent {
    /// Decode a text frame.
    pub fn decode(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

// ============================================================================
// Outbound events (server -> client)
// ============================================================================

/// Events emitted by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Full room snapshot sent to a joining connection — the reconciliation
    /// path for late or returning joiners.
    #[serde(rename_all = "camelCase")]
    RoomState {
        pieces: PieceMap,
        groups: GroupMap,
        image: Option<Value>,
        puzzle_config: Option<Value>,
        users: Vec<Participant>,
        your_color: String,
        your_id: ConnectionId,
    },
    /// A puzzle image is available. Sent to the whole room on upload, and to
    /// a joining connection when the room already has an image;
    /// `current_positions` carries the room's current group layout so a
    /// rejoining client can resume mid-puzzle.
    #[serde(rename_all = "camelCase")]
    ImageLoaded {
        image: Value,
        puzzle_config: Value,
        uploaded_by: String,
        current_positions: GroupMap,
    },
    #[serde(rename_all = "camelCase")]
    UserJoined {
        id: ConnectionId,
        name: String,
        color: String,
        users: Vec<Participant>,
    },
    #[serde(rename_all = "camelCase")]
    UserLeft {
        id: ConnectionId,
        name: String,
        users: Vec<Participant>,
    },
    #[serde(rename_all = "camelCase")]
    PiecesInitialized { pieces: PieceMap, groups: GroupMap },
    #[serde(rename_all = "camelCase")]
    DragDenied { group_id: GroupId },
    #[serde(rename_all = "camelCase")]
    PieceDragStart {
        group_id: GroupId,
        user_id: ConnectionId,
        user_name: String,
        user_color: String,
    },
    #[serde(rename_all = "camelCase")]
    PieceMoved {
        group_id: GroupId,
        x: f64,
        y: f64,
        user_id: ConnectionId,
    },
    #[serde(rename_all = "camelCase")]
    PieceDragEnd {
        group_id: GroupId,
        x: f64,
        y: f64,
        merged_with: Option<GroupId>,
        updated_groups: Option<GroupMap>,
        updated_pieces: Option<PieceMap>,
        user_id: ConnectionId,
    },
    #[serde(rename_all = "camelCase")]
    PuzzleComplete { completed_by: String },
    #[serde(rename_all = "camelCase")]
    CursorUpdate {
        user_id: ConnectionId,
        user_name: String,
        user_color: String,
        x: f64,
        y: f64,
    },
    /// Chat relay with a server-assigned Unix-millisecond timestamp.
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        user_id: ConnectionId,
        user_name: String,
        user_color: String,
        message: String,
        timestamp: u64,
    },
}

impl ServerEvent {
    /// Encode to a text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a text frame (used by clients and tests).
    pub fn decode(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_join_room_frame() {
        let frame = r#"{"event":"join-room","data":{"roomId":"r1","name":"Alice"}}"#;
        let event = ClientEvent::decode(frame).unwrap();
        assert_eq!(
            event,
            ClientEvent::JoinRoom {
                room_id: "r1".into(),
                name: Some("Alice".to_string()),
            }
        );
    }

    #[test]
    fn join_room_name_is_optional() {
        let frame = r#"{"event":"join-room","data":{"roomId":"r1"}}"#;
        let event = ClientEvent::decode(frame).unwrap();
        assert_eq!(
            event,
            ClientEvent::JoinRoom {
                room_id: "r1".into(),
                name: None,
            }
        );
    }

    #[test]
    fn drag_end_defaults_optional_fields() {
        let frame = r#"{"event":"drag-end","data":{"groupId":"g1","x":10.0,"y":20.0}}"#;
        let event = ClientEvent::decode(frame).unwrap();
        match event {
            ClientEvent::DragEnd {
                group_id,
                merged_with,
                updated_groups,
                updated_pieces,
                is_complete,
                ..
            } => {
                assert_eq!(group_id, "g1".into());
                assert!(merged_with.is_none());
                assert!(updated_groups.is_none());
                assert!(updated_pieces.is_none());
                assert!(!is_complete);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn encodes_wire_names() {
        let frame = ServerEvent::DragDenied {
            group_id: "g7".into(),
        }
        .encode()
        .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "drag-denied");
        assert_eq!(value["data"]["groupId"], "g7");
    }

    #[test]
    fn room_state_uses_camel_case_fields() {
        let frame = ServerEvent::RoomState {
            pieces: PieceMap::new(),
            groups: GroupMap::new(),
            image: Some(json!("base64...")),
            puzzle_config: Some(json!({"rows": 4, "cols": 6})),
            users: vec![Participant {
                id: ConnectionId(3),
                name: "Alice".to_string(),
                color: "#FF6B6B".to_string(),
            }],
            your_color: "#FF6B6B".to_string(),
            your_id: ConnectionId(3),
        }
        .encode()
        .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "room-state");
        assert_eq!(value["data"]["puzzleConfig"]["rows"], 4);
        assert_eq!(value["data"]["yourId"], 3);
        assert_eq!(value["data"]["users"][0]["color"], "#FF6B6B");
    }

    #[test]
    fn server_events_round_trip() {
        let event = ServerEvent::ChatMessage {
            user_id: ConnectionId(9),
            user_name: "Bob".to_string(),
            user_color: "#4ECDC4".to_string(),
            message: "hello".to_string(),
            timestamp: 1_700_000_000_123,
        };
        let decoded = ServerEvent::decode(&event.encode().unwrap()).unwrap();
        assert_eq!(decoded, event);
    }
}
