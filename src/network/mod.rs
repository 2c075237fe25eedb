//! The network-fetch primitive the agent falls back to.
//!
//! [`Fetch`] is the seam between interception logic and real I/O: the agent
//! only ever talks to `dyn Fetch`, so tests drive it with a scripted network
//! and the proxy host drives it with [`HttpClient`].

use futures::future::BoxFuture;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::http::{Headers, Request, Response, ResponseType, StatusCode};

/// A fetch that rejected instead of producing a response.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("network request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unsupported method: {0}")]
    Method(String),

    #[error("network unreachable: {0}")]
    Unreachable(String),
}

/// Issues a request to the network.
///
/// Implementations must resolve to `Err` only when no response was obtained
/// at all; an error status is still `Ok`.
pub trait Fetch: Send + Sync {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetworkError>>;
}

/// Production [`Fetch`] over `reqwest`.
///
/// Responses whose final URL shares `origin` are labelled
/// [`ResponseType::Basic`]; everything else is [`ResponseType::Cors`].
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    origin: Url,
}

impl HttpClient {
    pub fn new(origin: Url) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, origin })
    }

    async fn send(&self, request: Request) -> Result<Response, NetworkError> {
        let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
            .map_err(|_| NetworkError::Method(request.method().to_string()))?;

        let mut builder = self.client.request(method, request.url().clone());
        for (name, value) in request.headers().iter() {
            // The client derives these from the target URL and body.
            if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            builder = builder.header(name, value);
        }
        if !request.body().is_empty() {
            builder = builder.body(request.body().clone());
        }

        let upstream = builder.send().await?;
        let status = StatusCode::from_u16(upstream.status().as_u16());
        let final_url = upstream.url().clone();

        let mut headers = Headers::with_capacity(upstream.headers().len());
        for (name, value) in upstream.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str(), value);
            }
        }

        let response_type = if final_url.origin() == self.origin.origin() {
            ResponseType::Basic
        } else {
            ResponseType::Cors
        };

        let body = upstream.bytes().await?;
        debug!(url = %final_url, status = %status, "network response");

        Ok(Response::new(status)
            .with_headers(headers)
            .with_type(response_type)
            .with_url(final_url)
            .with_body(body))
    }
}

impl Fetch for HttpClient {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetworkError>> {
        Box::pin(self.send(request))
    }
}
