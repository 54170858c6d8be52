//! `RoomcastServer` builder and server loop.
//!
//! Ties the layers together: transport → route → room manager.

use std::sync::Arc;

use roomcast_room::{RoomConfig, RoomManager};
use roomcast_transport::{Transport, TransportError, WebSocketConnection, WebSocketTransport};

use crate::RoomcastError;
use crate::handler::{answer_http, handle_connection};
use crate::route::Route;

/// Room manager specialised to the connections this server accepts.
pub type Rooms = RoomManager<WebSocketConnection>;

/// Builder for configuring and starting a roomcast server.
///
/// # Example
///
/// ```rust,ignore
/// use std::time::Duration;
/// use roomcast::prelude::*;
///
/// let server = RoomcastServer::builder()
///     .bind("0.0.0.0:8080")
///     .room_config(RoomConfig::with_tick_interval(Duration::from_millis(500)))
///     .build()
///     .await?;
/// server.run().await
/// ```
pub struct RoomcastServerBuilder {
    bind_addr: String,
    room_config: RoomConfig,
}

impl RoomcastServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            room_config: RoomConfig::default(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the configuration applied to every room.
    pub fn room_config(mut self, config: RoomConfig) -> Self {
        self.room_config = config;
        self
    }

    /// Binds the listener. Connections are not accepted until
    /// [`RoomcastServer::run`] is called.
    pub async fn build(self) -> Result<RoomcastServer, RoomcastError> {
        let rooms = Arc::new(RoomManager::new(self.room_config.clone()));
        let http_rooms = Arc::clone(&rooms);
        let transport = WebSocketTransport::bind(&self.bind_addr)
            .await?
            .with_request_filter(|info| Route::from_request(info).map(|_| ()))
            .with_http_handler(move |info| answer_http(info, Arc::clone(&http_rooms)));

        tracing::debug!(
            addr = %self.bind_addr,
            tick_ms = self.room_config.tick.interval.as_millis() as u64,
            "roomcast server bound"
        );

        Ok(RoomcastServer { transport, rooms })
    }
}

impl Default for RoomcastServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound roomcast server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct RoomcastServer {
    transport: WebSocketTransport,
    rooms: Arc<Rooms>,
}

impl RoomcastServer {
    /// Creates a new builder.
    pub fn builder() -> RoomcastServerBuilder {
        RoomcastServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The server's room registry, shared with every connection task.
    pub fn rooms(&self) -> &Arc<Rooms> {
        &self.rooms
    }

    /// Runs the accept loop, spawning a handler task per connection.
    /// Runs until the future is dropped or the process ends.
    pub async fn run(mut self) -> Result<(), RoomcastError> {
        match self.local_addr() {
            Ok(addr) => tracing::info!(%addr, "roomcast server running"),
            Err(_) => tracing::info!("roomcast server running"),
        }

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let rooms = Arc::clone(&self.rooms);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, rooms).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(TransportError::Rejected { status, reason }) => {
                    tracing::debug!(status, %reason, "upgrade rejected");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                }
            }
        }
    }
}
