//! Unified error type for roomcast.

use roomcast_protocol::ProtocolError;
use roomcast_room::RoomError;
use roomcast_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum RoomcastError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Encoding or decoding a frame failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A room-level error.
    #[error(transparent)]
    Room(#[from] RoomError),
}
