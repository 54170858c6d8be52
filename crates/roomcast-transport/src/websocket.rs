//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! Every accepted socket is negotiated in its own task, so a slow or silent
//! peer never holds up the listener. Requests that don't ask for a WebSocket
//! upgrade can be answered as plain HTTP through
//! [`WebSocketTransport::with_http_handler`].

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::handshake::machine::TryParse;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response, write_response,
};
use tokio_tungstenite::tungstenite::http::{StatusCode, header};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::{
    Connection, ConnectionId, HttpReply, Rejection, RequestInfo, Transport, TransportError,
};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Upper bound on one peer's HTTP exchange, upgrade or plain.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest request head accepted before the peer is dropped.
const MAX_REQUEST_HEAD: usize = 8 * 1024;

/// Pause between peeks while a request head is still arriving.
const PEEK_RETRY: Duration = Duration::from_millis(5);

type WsStream = tokio_tungstenite::WebSocketStream<TcpStream>;

/// A finished negotiation: a connection, or `None` if the peer was served
/// plain HTTP.
type Negotiated = Result<Option<WebSocketConnection>, TransportError>;

/// Decides, during the HTTP upgrade, whether a request may become a connection.
pub type RequestFilter = Arc<dyn Fn(&RequestInfo) -> Result<(), Rejection> + Send + Sync>;

/// Answers requests that arrive without a WebSocket upgrade. Returning
/// `None` falls back to the request filter's rejection, or 426.
pub type HttpHandler =
    Arc<dyn Fn(RequestInfo) -> BoxFuture<'static, Option<HttpReply>> + Send + Sync>;

/// A WebSocket-based [`Transport`] that listens for incoming connections.
pub struct WebSocketTransport {
    listener: TcpListener,
    filter: Option<RequestFilter>,
    http: Option<HttpHandler>,
    handshakes: JoinSet<Negotiated>,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self {
            listener,
            filter: None,
            http: None,
            handshakes: JoinSet::new(),
        })
    }

    /// Installs a filter that can refuse upgrades based on path and query.
    ///
    /// A refused request gets the rejection's status and reason as its HTTP
    /// response, and `accept` returns [`TransportError::Rejected`].
    pub fn with_request_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&RequestInfo) -> Result<(), Rejection> + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Installs a handler for plain HTTP requests (no `Upgrade: websocket`).
    ///
    /// The reply is written and the socket closed; no connection is handed
    /// to `accept`.
    pub fn with_http_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(RequestInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<HttpReply>> + Send + 'static,
    {
        self.http = Some(Arc::new(move |info| handler(info).boxed()));
        self
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    /// Cancel-safe: negotiations in flight keep running in their own tasks
    /// and are picked up by the next call.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        loop {
            tokio::select! {
                Some(joined) = self.handshakes.join_next() => match joined {
                    Ok(Ok(Some(conn))) => return Ok(conn),
                    Ok(Ok(None)) => continue,
                    Ok(Err(e)) => return Err(e),
                    Err(e) => {
                        tracing::warn!(error = %e, "handshake task failed");
                        continue;
                    }
                },
                accepted = self.listener.accept() => {
                    let (stream, addr) = accepted.map_err(TransportError::AcceptFailed)?;
                    self.handshakes.spawn(negotiate(
                        stream,
                        addr,
                        self.filter.clone(),
                        self.http.clone(),
                    ));
                }
            }
        }
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Runs [`exchange`] for one socket, bounded by [`HANDSHAKE_TIMEOUT`].
async fn negotiate(
    stream: TcpStream,
    addr: SocketAddr,
    filter: Option<RequestFilter>,
    http: Option<HttpHandler>,
) -> Negotiated {
    let work = exchange(stream, addr, filter.as_ref(), http.as_ref());
    match tokio::time::timeout(HANDSHAKE_TIMEOUT, work).await {
        Ok(negotiated) => negotiated,
        Err(elapsed) => {
            tracing::debug!(%addr, "peer sent no complete request in time");
            Err(TransportError::AcceptFailed(TransportError::io(
                std::io::ErrorKind::TimedOut,
                elapsed,
            )))
        }
    }
}

/// Reads the peer's request and either upgrades it or answers it as plain
/// HTTP.
async fn exchange(
    stream: TcpStream,
    addr: SocketAddr,
    filter: Option<&RequestFilter>,
    http: Option<&HttpHandler>,
) -> Negotiated {
    let (head_len, request) = peek_request(&stream).await?;
    if !wants_upgrade(&request) {
        serve_plain(stream, head_len, &request, filter, http).await?;
        return Ok(None);
    }

    let (ws, request) = upgrade(stream, filter).await?;
    let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
    tracing::debug!(%id, %addr, path = request.path(), "accepted WebSocket connection");

    let (sink, stream) = ws.split();
    Ok(Some(WebSocketConnection {
        id,
        peer_addr: addr,
        request,
        sink: Mutex::new(sink),
        stream: Mutex::new(stream),
    }))
}

/// Waits until a full request head is buffered and parses it without
/// consuming anything from the socket.
///
/// Returns the head's length in bytes along with the request.
async fn peek_request(stream: &TcpStream) -> Result<(usize, Request), TransportError> {
    let mut buf = vec![0u8; MAX_REQUEST_HEAD];
    loop {
        let n = stream.peek(&mut buf).await.map_err(TransportError::AcceptFailed)?;
        if n == 0 {
            return Err(TransportError::AcceptFailed(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "peer closed before sending a request",
            )));
        }

        match Request::try_parse(&buf[..n]) {
            Ok(Some(parsed)) => return Ok(parsed),
            Ok(None) if n < buf.len() => tokio::time::sleep(PEEK_RETRY).await,
            Ok(None) => {
                return Err(TransportError::AcceptFailed(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "request head too large",
                )));
            }
            Err(e) => {
                return Err(TransportError::AcceptFailed(TransportError::io(
                    std::io::ErrorKind::InvalidData,
                    e,
                )));
            }
        }
    }
}

fn wants_upgrade(request: &Request) -> bool {
    request
        .headers()
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

fn request_target(request: &Request) -> &str {
    request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| request.uri().path())
}

/// Answers a request that did not ask for an upgrade, then closes the socket.
async fn serve_plain(
    mut stream: TcpStream,
    head_len: usize,
    request: &Request,
    filter: Option<&RequestFilter>,
    http: Option<&HttpHandler>,
) -> Result<(), TransportError> {
    // Drain the head so the close is a clean FIN rather than a reset.
    let mut head = vec![0u8; head_len];
    stream
        .read_exact(&mut head)
        .await
        .map_err(TransportError::AcceptFailed)?;

    let info = RequestInfo::from_target(request_target(request));
    let handled = match http {
        Some(handler) => handler(info.clone()).await,
        None => None,
    };
    let reply = handled.unwrap_or_else(|| match filter.map(|filter| filter(&info)) {
        Some(Err(rejection)) => rejection.into(),
        _ => HttpReply::text(426, "WebSocket upgrade required"),
    });

    let response = Response::builder()
        .status(reply.status)
        .header(header::CONTENT_TYPE, reply.content_type)
        .header(header::CONTENT_LENGTH, reply.body.len())
        .header(header::CONNECTION, "close")
        .body(())
        .map_err(|e| {
            TransportError::SendFailed(TransportError::io(std::io::ErrorKind::InvalidData, e))
        })?;

    let mut out = Vec::with_capacity(128 + reply.body.len());
    write_response(&mut out, &response).map_err(|e| {
        TransportError::SendFailed(TransportError::io(std::io::ErrorKind::InvalidData, e))
    })?;
    out.extend_from_slice(reply.body.as_bytes());

    stream
        .write_all(&out)
        .await
        .map_err(TransportError::SendFailed)?;
    stream.shutdown().await.map_err(TransportError::SendFailed)?;

    tracing::debug!(
        path = info.path(),
        status = reply.status,
        "answered plain HTTP request"
    );
    Ok(())
}

/// Runs the server side of the HTTP upgrade, capturing the request target.
async fn upgrade(
    stream: TcpStream,
    filter: Option<&RequestFilter>,
) -> Result<(WsStream, RequestInfo), TransportError> {
    let mut info = RequestInfo::default();
    let mut rejection: Option<Rejection> = None;

    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        info = RequestInfo::from_target(request_target(req));

        if let Some(filter) = filter {
            if let Err(refused) = filter(&info) {
                let mut err = ErrorResponse::new(Some(refused.reason.clone()));
                *err.status_mut() =
                    StatusCode::from_u16(refused.status).unwrap_or(StatusCode::BAD_REQUEST);
                rejection = Some(refused);
                return Err(err);
            }
        }
        Ok(resp)
    };

    match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => Ok((ws, info)),
        Err(e) => match rejection {
            Some(refused) => Err(TransportError::Rejected {
                status: refused.status,
                reason: refused.reason,
            }),
            None => Err(TransportError::AcceptFailed(TransportError::io(
                std::io::ErrorKind::ConnectionRefused,
                e,
            ))),
        },
    }
}

/// A single WebSocket connection.
///
/// The stream is split so that writers (room broadcasts) never wait on the
/// reader parked in [`recv`](Connection::recv).
pub struct WebSocketConnection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    request: RequestInfo,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WebSocketConnection {
    /// The request that opened this connection.
    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    /// The remote peer's address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    async fn write(&self, msg: Message) -> Result<(), TransportError> {
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(TransportError::io(std::io::ErrorKind::BrokenPipe, e))
        })
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        self.write(Message::Binary(data.to_vec().into())).await
    }

    async fn send_text(&self, text: &str) -> Result<(), Self::Error> {
        self.write(Message::text(text.to_owned())).await
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.to_vec())),
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_bytes().to_vec())),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // ping/pong/raw frame
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    return Ok(None);
                }
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(TransportError::io(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.sink.lock().await.close().await.map_err(|e| {
            TransportError::SendFailed(TransportError::io(std::io::ErrorKind::BrokenPipe, e))
        })
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
