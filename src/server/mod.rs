//! Local proxy host.
//!
//! Accepts browser connections over HTTP/1.1, resolves each request against
//! the application origin, and hands it to a handler (normally
//! [`proxy::route`]) that plays the platform's part: deliver the fetch event,
//! fall back to the network when the agent passes, and relay the answer.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::http::{
    StatusCode,
    request::{MAX_REQUEST_SIZE, Request, RequestError},
    response::Response,
};

pub mod proxy;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// The proxy host's listener.
///
/// # Examples
///
/// ```rust,no_run
/// use focusflow_agent::http::{Response, StatusCode};
/// use focusflow_agent::server::Server;
/// use url::Url;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let origin = Url::parse("http://localhost:3000")?;
///     let server = Server::bind("127.0.0.1:8080", origin).await?;
///     server.run(|_req| async {
///         Response::new(StatusCode::OK).with_body("Hello!")
///     }).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    origin: Arc<Url>,
}

impl Server {
    /// Binds to `addr`. Incoming request targets are resolved against `origin`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: impl AsRef<str>, origin: Url) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            origin: Arc::new(origin),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until the listener fails, dispatching every
    /// request to `handler` on its own Tokio task.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, origin = %self.origin, "proxy listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Arc::clone(&handler);
            let origin = Arc::clone(&self.origin);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, &origin, handler).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Serves requests on one connection until the peer closes it or asks for
/// `Connection: close`.
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    origin: &Url,
    handler: Arc<H>,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        // Pipelined requests may already be buffered.
        let (request, consumed) = match Request::parse(&buf, origin) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => {
                if buf.len() > MAX_REQUEST_SIZE {
                    warn!(peer = %peer_addr, "request too large, sending 413");
                    let response = Response::new(StatusCode::PAYLOAD_TOO_LARGE)
                        .with_body("Request entity too large")
                        .keep_alive(false);
                    stream.write_all(&response.into_bytes()).await?;
                    break;
                }
                if stream.read_buf(&mut buf).await? == 0 {
                    debug!(peer = %peer_addr, "connection closed by peer");
                    break;
                }
                continue;
            }
            Err(e) => {
                let status = match e {
                    RequestError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                    RequestError::UnsupportedFraming(_) => StatusCode::LENGTH_REQUIRED,
                    _ => StatusCode::BAD_REQUEST,
                };
                warn!(peer = %peer_addr, error = %e, status = %status, "rejecting request");
                let response = Response::new(status)
                    .with_body(e.to_string())
                    .keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };
        let _ = buf.split_to(consumed);

        let keep_alive = request.is_keep_alive();
        debug!(
            peer = %peer_addr,
            method = %request.method(),
            url = %request.url(),
            "dispatching request"
        );

        let response = handler(request).await.keep_alive(keep_alive);
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            break;
        }
    }

    Ok(())
}
