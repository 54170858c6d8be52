//! Identifiers and events that make up roomcast's wire format.

use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Name of a room, as supplied by clients (`?room_id=...`).
///
/// Serialized as a bare string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Caller-supplied user identifier. May be empty; it is never validated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifies one registered connection inside a room.
///
/// Uniqueness within a room is the caller's job; a second registration under
/// the same id replaces the first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Builds the `"{room}-{seq}"` form used by the room manager.
    pub fn sequenced(room: &RoomId, seq: u64) -> Self {
        Self(format!("{room}-{seq}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Payload of a `user_join` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserJoin {
    pub user_id: UserId,
    pub room_id: RoomId,
    /// Member count right after the join, including the new member.
    pub total_users: usize,
    /// RFC 3339 timestamp.
    pub joined_at: String,
}

/// Payload of a `user_leave` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLeave {
    pub user_id: UserId,
    pub room_id: RoomId,
    /// Member count right after the departure.
    pub total_users: usize,
    /// RFC 3339 timestamp.
    pub left_at: String,
}

/// Payload of a `counter_update` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterUpdate {
    pub count: u64,
    pub room_id: RoomId,
}

/// An event broadcast to every member of a room.
///
/// Encoded as an adjacently tagged envelope:
///
/// ```text
/// {"event":"counter_update","data":{"count":3,"room_id":"lobby"}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RoomEvent {
    UserJoin(UserJoin),
    UserLeave(UserLeave),
    CounterUpdate(CounterUpdate),
}

impl RoomEvent {
    /// A join event stamped with the current time.
    pub fn user_join(user_id: UserId, room_id: RoomId, total_users: usize) -> Self {
        Self::UserJoin(UserJoin {
            user_id,
            room_id,
            total_users,
            joined_at: rfc3339_now(),
        })
    }

    /// A leave event stamped with the current time.
    pub fn user_leave(user_id: UserId, room_id: RoomId, total_users: usize) -> Self {
        Self::UserLeave(UserLeave {
            user_id,
            room_id,
            total_users,
            left_at: rfc3339_now(),
        })
    }

    pub fn counter_update(count: u64, room_id: RoomId) -> Self {
        Self::CounterUpdate(CounterUpdate { count, room_id })
    }

    /// The wire name of the event (the `event` discriminator).
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserJoin(_) => "user_join",
            Self::UserLeave(_) => "user_leave",
            Self::CounterUpdate(_) => "counter_update",
        }
    }

    /// The room the event belongs to.
    pub fn room_id(&self) -> &RoomId {
        match self {
            Self::UserJoin(e) => &e.room_id,
            Self::UserLeave(e) => &e.room_id,
            Self::CounterUpdate(e) => &e.room_id,
        }
    }
}

/// Serializes an event to its JSON text form.
pub fn encode_event(event: &RoomEvent) -> Result<String, ProtocolError> {
    serde_json::to_string(event).map_err(ProtocolError::Encode)
}

/// Parses an event from JSON bytes.
pub fn decode_event(data: &[u8]) -> Result<RoomEvent, ProtocolError> {
    serde_json::from_slice(data).map_err(ProtocolError::Decode)
}

/// Current UTC time as RFC 3339 with second precision, e.g. `2026-10-19T08:00:00Z`.
pub fn rfc3339_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_counter_update_envelope_shape() {
        let event = RoomEvent::counter_update(3, RoomId::from("lobby"));
        let value: serde_json::Value =
            serde_json::from_str(&encode_event(&event).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"event": "counter_update", "data": {"count": 3, "room_id": "lobby"}})
        );
    }

    #[test]
    fn test_user_join_envelope_shape() {
        let event = RoomEvent::UserJoin(UserJoin {
            user_id: UserId::from("ann"),
            room_id: RoomId::from("r1"),
            total_users: 2,
            joined_at: "2026-10-19T08:00:00Z".into(),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "user_join",
                "data": {
                    "user_id": "ann",
                    "room_id": "r1",
                    "total_users": 2,
                    "joined_at": "2026-10-19T08:00:00Z"
                }
            })
        );
    }

    #[test]
    fn test_user_leave_uses_left_at() {
        let event = RoomEvent::user_leave(UserId::default(), RoomId::from("r1"), 0);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "user_leave");
        assert_eq!(value["data"]["user_id"], "");
        assert_eq!(value["data"]["total_users"], 0);
        assert!(value["data"]["left_at"].is_string());
        assert!(value["data"].get("joined_at").is_none());
    }

    #[test]
    fn test_decode_event_from_client_bytes() {
        let raw = br#"{"event":"user_leave","data":{"user_id":"b","room_id":"r1","total_users":1,"left_at":"2026-10-19T08:00:01Z"}}"#;
        match decode_event(raw).unwrap() {
            RoomEvent::UserLeave(leave) => {
                assert_eq!(leave.user_id.as_str(), "b");
                assert_eq!(leave.total_users, 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_unknown_event() {
        let err = decode_event(br#"{"event":"explode","data":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn test_event_name_and_room() {
        let event = RoomEvent::user_join(UserId::from("a"), RoomId::from("r9"), 1);
        assert_eq!(event.name(), "user_join");
        assert_eq!(event.room_id().as_str(), "r9");
    }

    #[test]
    fn test_rfc3339_now_parses_back() {
        let stamp = rfc3339_now();
        assert!(stamp.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&stamp).is_ok());
    }

    #[test]
    fn test_sequenced_member_id() {
        let id = MemberId::sequenced(&RoomId::from("lobby"), 7);
        assert_eq!(id.as_str(), "lobby-7");
    }
}
