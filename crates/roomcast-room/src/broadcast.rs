//! Room members and event fan-out.

use std::sync::Arc;

use roomcast_protocol::{MemberId, RoomEvent, RoomId, UserId, encode_event};
use roomcast_transport::Connection;

// ---------------------------------------------------------------------------
// Member
// ---------------------------------------------------------------------------

/// A connection registered in a room, tagged with who it belongs to.
///
/// Cloning is cheap: the connection itself is shared.
pub struct Member<C: Connection> {
    conn: Arc<C>,
    room_id: RoomId,
    user_id: UserId,
}

impl<C: Connection> Member<C> {
    pub fn new(conn: Arc<C>, room_id: RoomId, user_id: UserId) -> Self {
        Self {
            conn,
            room_id,
            user_id,
        }
    }

    pub fn conn(&self) -> &Arc<C> {
        &self.conn
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// May be empty when the client didn't supply one.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }
}

impl<C: Connection> Clone for Member<C> {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            room_id: self.room_id.clone(),
            user_id: self.user_id.clone(),
        }
    }
}

impl<C: Connection> std::fmt::Debug for Member<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Member")
            .field("conn", &self.conn.id())
            .field("room_id", &self.room_id)
            .field("user_id", &self.user_id)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

impl BroadcastReport {
    pub fn recipients(&self) -> usize {
        self.delivered + self.failed
    }
}

/// Encodes `event` once and writes it to every recipient, one attempt each.
///
/// A failed write is logged and counted; it never stops delivery to the
/// remaining recipients. If the event can't be encoded nothing is sent.
pub(crate) async fn broadcast<'a, C, I>(
    room_id: &RoomId,
    recipients: I,
    event: &RoomEvent,
) -> BroadcastReport
where
    C: Connection,
    I: IntoIterator<Item = (&'a MemberId, &'a Member<C>)>,
{
    let mut report = BroadcastReport::default();

    let text = match encode_event(event) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(
                room_id = %room_id,
                event = event.name(),
                error = %e,
                "failed to encode event, skipping broadcast"
            );
            return report;
        }
    };

    for (member_id, member) in recipients {
        match member.conn.send_text(&text).await {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                report.failed += 1;
                tracing::debug!(
                    room_id = %room_id,
                    member_id = %member_id,
                    event = event.name(),
                    error = %e,
                    "broadcast write failed"
                );
            }
        }
    }

    report
}
