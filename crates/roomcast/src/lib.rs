//! # Roomcast
//!
//! WebSocket rooms with a shared per-room counter.
//!
//! Clients connect to `/ws?room_id=<room>&user_id=<user>`. Everyone in a room
//! is told when somebody joins or leaves, and while the room is occupied a
//! counter ticks once per interval and is broadcast to all members. The last
//! member to leave stops the counter and the room is discarded.
//!
//! `/ws/rooms` reports every live room as JSON, either as the body of a plain
//! HTTP `GET` or as a single WebSocket frame.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use roomcast::prelude::*;
//!
//! # async fn start() -> Result<(), RoomcastError> {
//! let server = RoomcastServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```

mod error;
mod handler;
mod route;
mod server;

pub use error::RoomcastError;
pub use route::{MONITOR_PATH, ROOM_PATH};
pub use server::{RoomcastServer, RoomcastServerBuilder, Rooms};

/// Everything needed to run a server and inspect its rooms.
pub mod prelude {
    pub use crate::{RoomcastError, RoomcastServer, RoomcastServerBuilder, Rooms};
    pub use roomcast_protocol::{MemberId, RoomEvent, RoomId, UserId};
    pub use roomcast_room::{RoomConfig, RoomManager, RoomSnapshot, TimerState};
    pub use roomcast_tick::{TickConfig, TickPolicy};
}
