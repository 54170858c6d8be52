/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding, accepting, or upgrading a connection failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The upgrade request was refused by the request filter.
    #[error("request rejected with status {status}: {reason}")]
    Rejected { status: u16, reason: String },

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// Wraps any displayable error as an I/O error of the given kind.
    pub(crate) fn io(
        kind: std::io::ErrorKind,
        err: impl std::error::Error + Send + Sync + 'static,
    ) -> std::io::Error {
        std::io::Error::new(kind, err)
    }
}
