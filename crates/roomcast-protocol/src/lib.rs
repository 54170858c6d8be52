//! Wire protocol for roomcast.
//!
//! This crate defines what travels from a room to its members:
//!
//! - **Identifiers** ([`RoomId`], [`UserId`], [`MemberId`]): newtypes so a
//!   room id can't be passed where a member id is expected.
//! - **Events** ([`RoomEvent`] and its payloads): the tagged
//!   `{"event": ..., "data": ...}` envelope members receive.
//! - **Encoding** ([`encode_event`], [`decode_event`]) and
//!   [`ProtocolError`].
//!
//! It knows nothing about connections or locking; the room crate decides
//! when events are produced and who receives them.

mod error;
mod types;

pub use error::ProtocolError;
pub use types::{
    CounterUpdate, MemberId, RoomEvent, RoomId, UserId, UserJoin, UserLeave, decode_event,
    encode_event, rfc3339_now,
};
