//! Per-connection handler.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! Room connections:
//!   1. Join the room named in the request (broadcasts `user_join`)
//!   2. Read until the peer closes; inbound payloads are ignored
//!   3. Leave the room (broadcasts `user_leave`, prunes the room if empty)
//!   4. Close the socket
//!
//! Monitor connections get one snapshot frame and are closed. The same
//! snapshot is served to plain HTTP `GET`s by [`answer_http`].

use std::collections::BTreeMap;
use std::sync::Arc;

use roomcast_protocol::{MemberId, ProtocolError, RoomId, UserId};
use roomcast_room::RoomSnapshot;
use roomcast_transport::{
    Connection, HttpReply, RequestInfo, TransportError, WebSocketConnection,
};
use serde::Serialize;

use crate::RoomcastError;
use crate::route::Route;
use crate::server::Rooms;

/// Drop guard that takes a member out of its room when the handler exits.
///
/// The normal path calls [`leave`](Self::leave) and awaits it. If the
/// handler returns early or panics, `Drop` spawns the leave instead.
struct MembershipGuard {
    rooms: Option<Arc<Rooms>>,
    room_id: RoomId,
    member_id: MemberId,
}

impl MembershipGuard {
    async fn leave(mut self) {
        if let Some(rooms) = self.rooms.take() {
            rooms.leave(&self.room_id, &self.member_id).await;
        }
    }
}

impl Drop for MembershipGuard {
    fn drop(&mut self) {
        let Some(rooms) = self.rooms.take() else {
            return;
        };
        let room_id = self.room_id.clone();
        let member_id = self.member_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    rooms.leave(&room_id, &member_id).await;
                });
            }
            Err(_) => {
                tracing::warn!(%room_id, %member_id, "no runtime, member not removed");
            }
        }
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection(
    conn: WebSocketConnection,
    rooms: Arc<Rooms>,
) -> Result<(), RoomcastError> {
    let conn_id = conn.id();
    tracing::debug!(%conn_id, peer = %conn.peer_addr(), "handling new connection");

    match Route::from_request(conn.request()) {
        Ok(Route::Room { room_id, user_id }) => serve_room(conn, rooms, room_id, user_id).await,
        Ok(Route::Monitor) => serve_monitor(conn, &rooms).await,
        Err(rejection) => {
            close_quietly(&conn).await;
            Err(TransportError::Rejected {
                status: rejection.status,
                reason: rejection.reason,
            }
            .into())
        }
    }
}

async fn serve_room(
    conn: WebSocketConnection,
    rooms: Arc<Rooms>,
    room_id: RoomId,
    user_id: UserId,
) -> Result<(), RoomcastError> {
    let conn = Arc::new(conn);
    let conn_id = conn.id();

    let membership = rooms.join(room_id, user_id, Arc::clone(&conn)).await;
    let guard = MembershipGuard {
        rooms: Some(Arc::clone(&rooms)),
        room_id: membership.room_id().clone(),
        member_id: membership.member_id().clone(),
    };

    tracing::info!(
        %conn_id,
        room_id = %membership.room_id(),
        member_id = %membership.member_id(),
        members = membership.total(),
        "client joined room"
    );
    drop(membership);

    loop {
        match conn.recv().await {
            Ok(Some(data)) => {
                tracing::debug!(
                    %conn_id,
                    room_id = %guard.room_id,
                    bytes = data.len(),
                    "ignoring inbound message"
                );
            }
            Ok(None) => {
                tracing::info!(%conn_id, room_id = %guard.room_id, "connection closed cleanly");
                break;
            }
            Err(e) => {
                tracing::debug!(%conn_id, room_id = %guard.room_id, error = %e, "recv error");
                break;
            }
        }
    }

    guard.leave().await;
    close_quietly(&conn).await;
    Ok(())
}

#[derive(Serialize)]
struct RoomsReport {
    rooms: BTreeMap<RoomId, RoomSnapshot>,
}

impl RoomsReport {
    async fn collect(rooms: &Rooms) -> Self {
        Self {
            rooms: rooms.snapshot().await,
        }
    }

    fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

async fn serve_monitor(conn: WebSocketConnection, rooms: &Rooms) -> Result<(), RoomcastError> {
    let report = RoomsReport::collect(rooms).await;
    let body = report.to_json()?;

    tracing::debug!(conn_id = %conn.id(), rooms = report.rooms.len(), "sending room snapshot");
    conn.send_text(&body).await?;
    close_quietly(&conn).await;
    Ok(())
}

/// Answers plain HTTP requests. Only the monitor path is served; anything
/// else is left to the transport's default reply.
pub(crate) async fn answer_http(info: RequestInfo, rooms: Arc<Rooms>) -> Option<HttpReply> {
    if !matches!(Route::from_request(&info), Ok(Route::Monitor)) {
        return None;
    }

    let report = RoomsReport::collect(&rooms).await;
    match report.to_json() {
        Ok(body) => {
            tracing::debug!(rooms = report.rooms.len(), "serving room snapshot over HTTP");
            Some(HttpReply::json(body))
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to encode room snapshot");
            Some(HttpReply::text(500, "failed to encode room snapshot"))
        }
    }
}

/// Closing a socket the peer already closed fails; that's not worth
/// surfacing.
async fn close_quietly(conn: &WebSocketConnection) {
    if let Err(e) = conn.close().await {
        tracing::trace!(conn_id = %conn.id(), error = %e, "close after peer close");
    }
}
