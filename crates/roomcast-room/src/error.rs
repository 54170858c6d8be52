//! Error types for the room layer.

use roomcast_protocol::RoomId;

/// Errors that can occur during room operations.
///
/// Most room operations can't fail: missing members and rooms are no-ops,
/// and broadcast failures are contained per recipient.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The manager already detached this room because it was empty.
    /// Joins should go through a fresh `get_or_create`.
    #[error("room {0} has been retired")]
    Retired(RoomId),
}
