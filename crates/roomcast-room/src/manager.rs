//! Registry of live rooms.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use roomcast_protocol::{MemberId, RoomId, UserId};
use roomcast_transport::Connection;
use tokio::sync::RwLock;

use crate::broadcast::Member;
use crate::config::RoomConfig;
use crate::room::{Room, RoomSnapshot};

// ---------------------------------------------------------------------------
// Membership
// ---------------------------------------------------------------------------

/// Receipt for a successful [`RoomManager::join`]. Pass its ids back to
/// [`RoomManager::leave`] when the connection goes away.
pub struct Membership<C: Connection> {
    room: Arc<Room<C>>,
    member_id: MemberId,
    total: usize,
}

impl<C: Connection> Membership<C> {
    pub fn room(&self) -> &Arc<Room<C>> {
        &self.room
    }

    pub fn room_id(&self) -> &RoomId {
        self.room.id()
    }

    pub fn member_id(&self) -> &MemberId {
        &self.member_id
    }

    /// Member count right after this join.
    pub fn total(&self) -> usize {
        self.total
    }
}

// ---------------------------------------------------------------------------
// RoomManager
// ---------------------------------------------------------------------------

/// Creates rooms on first use and discards them once empty.
///
/// At most one room exists per id at any time. Any number of tasks may
/// call into the manager concurrently.
pub struct RoomManager<C: Connection> {
    rooms: RwLock<HashMap<RoomId, Arc<Room<C>>>>,
    config: RoomConfig,
    next_member: AtomicU64,
}

impl<C: Connection> RoomManager<C> {
    pub fn new(config: RoomConfig) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            config,
            next_member: AtomicU64::new(1),
        }
    }

    /// Returns the room for `room_id`, creating it if absent.
    ///
    /// Concurrent callers with the same id all receive the same room.
    pub async fn get_or_create(&self, room_id: &RoomId) -> Arc<Room<C>> {
        if let Some(room) = self.rooms.read().await.get(room_id) {
            return Arc::clone(room);
        }

        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(room_id.clone()).or_insert_with(|| {
            tracing::info!(room_id = %room_id, "room created");
            Room::new(room_id.clone(), self.config.clone())
        });
        Arc::clone(room)
    }

    /// Looks up a room without creating it.
    pub async fn room(&self, room_id: &RoomId) -> Option<Arc<Room<C>>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Removes the room if it currently has no members, stopping its timer
    /// first. Returns `true` if a room was removed.
    ///
    /// A missing or occupied room is left alone.
    pub async fn remove_if_empty(&self, room_id: &RoomId) -> bool {
        let (room, retired) = {
            let mut rooms = self.rooms.write().await;
            let Some(room) = rooms.get(room_id).cloned() else {
                return false;
            };
            let Some(retired) = room.retire_if_empty().await else {
                return false;
            };
            rooms.remove(room_id);
            (room, retired)
        };

        retired.finish(room.id()).await;
        tracing::info!(room_id = %room_id, "room removed");
        true
    }

    /// Registers `conn` in `room_id`, creating the room if needed, and
    /// broadcasts the join.
    ///
    /// Each call gets a fresh member id, so the same connection may join
    /// several rooms.
    pub async fn join(&self, room_id: RoomId, user_id: UserId, conn: Arc<C>) -> Membership<C> {
        let seq = self.next_member.fetch_add(1, Ordering::Relaxed);
        let member_id = MemberId::sequenced(&room_id, seq);
        let member = Member::new(conn, room_id.clone(), user_id);

        loop {
            let room = self.get_or_create(&room_id).await;
            match room.add_connection(member_id.clone(), member.clone()).await {
                Ok(total) => {
                    return Membership {
                        room,
                        member_id,
                        total,
                    };
                }
                // The room was pruned between lookup and insert. The
                // registry no longer holds it, so the next lookup creates
                // a fresh one.
                Err(e) => {
                    tracing::debug!(room_id = %room_id, error = %e, "join raced room removal, retrying");
                }
            }
        }
    }

    /// Removes a member, then prunes the room if that left it empty.
    pub async fn leave(&self, room_id: &RoomId, member_id: &MemberId) -> Option<Member<C>> {
        let room = self.room(room_id).await?;
        let member = room.remove_connection(member_id).await;
        self.remove_if_empty(room_id).await;
        member
    }

    /// Snapshot of every live room, keyed and ordered by room id.
    ///
    /// Rooms are read one at a time, so the result is not a single atomic
    /// view across rooms.
    pub async fn snapshot(&self) -> BTreeMap<RoomId, RoomSnapshot> {
        let rooms: Vec<Arc<Room<C>>> = self.rooms.read().await.values().cloned().collect();

        let mut out = BTreeMap::new();
        for room in rooms {
            if let Some(snapshot) = room.live_snapshot().await {
                out.insert(room.id().clone(), snapshot);
            }
        }
        out
    }
}

impl<C: Connection> Default for RoomManager<C> {
    fn default() -> Self {
        Self::new(RoomConfig::default())
    }
}
