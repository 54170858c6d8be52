//! Maps an upgrade request to what the connection will be used for.

use roomcast_protocol::{RoomId, UserId};
use roomcast_transport::{Rejection, RequestInfo};

/// Path clients join rooms on.
pub const ROOM_PATH: &str = "/ws";
/// Path of the monitoring endpoint.
pub const MONITOR_PATH: &str = "/ws/rooms";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Route {
    /// Join `room_id` for the lifetime of the connection.
    Room { room_id: RoomId, user_id: UserId },
    /// Send one snapshot of every room, then close.
    Monitor,
}

impl Route {
    /// Also used as the transport's request filter, so a request that
    /// fails here never completes the upgrade.
    pub(crate) fn from_request(info: &RequestInfo) -> Result<Self, Rejection> {
        match info.path() {
            ROOM_PATH => {
                let room_id = match info.param("room_id") {
                    Some(id) if !id.is_empty() => RoomId::new(id),
                    _ => return Err(Rejection::bad_request("room_id is required")),
                };
                let user_id = UserId::new(info.param("user_id").unwrap_or_default());
                Ok(Self::Room { room_id, user_id })
            }
            MONITOR_PATH => Ok(Self::Monitor),
            other => Err(Rejection::not_found(format!("no route for {other}"))),
        }
    }
}
