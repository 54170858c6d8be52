//! Room lifecycle and fan-out engine for roomcast.
//!
//! A room groups live connections under a name. While it has at least one
//! member, a per-room timer task bumps a counter once per tick and broadcasts
//! it; joins and leaves are announced to the members as they happen.
//!
//! # Key types
//!
//! - [`RoomManager`]: registry of rooms; creates them on first join and
//!   prunes them when empty
//! - [`Room`]: membership, counter, and timer for one room
//! - [`Member`]: a connection registered in a room
//! - [`RoomConfig`]: tick settings applied to every room
//! - [`RoomSnapshot`]: read-only view for monitoring
//!
//! # Locking
//!
//! The registry and each room have their own `RwLock`. The registry lock may
//! be held while taking a room lock, never the other way round: nothing in a
//! room calls back into the manager.

mod broadcast;
mod config;
mod error;
mod manager;
mod room;

pub use broadcast::{BroadcastReport, Member};
pub use config::{RoomConfig, TimerState};
pub use error::RoomError;
pub use manager::{Membership, RoomManager};
pub use room::{Room, RoomSnapshot};
