//! Fetch responses: what the network returns, what the cache stores, and what
//! the proxy host writes back to the browser.

use bytes::{BufMut, Bytes, BytesMut};
use url::Url;

use super::{Headers, StatusCode};

/// How a response relates to the application's origin.
///
/// Only [`ResponseType::Basic`] responses are eligible for runtime caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// Same-origin, fully readable.
    Basic,
    /// Cross-origin, readable under CORS.
    Cors,
    /// Built in-process rather than fetched.
    #[default]
    Default,
    /// A network error.
    Error,
    /// Cross-origin without CORS; status and body are not observable.
    Opaque,
}

/// A fetch response.
///
/// Like [`Request`](super::Request) this is move-only; [`duplicate`](Self::duplicate)
/// produces a second handle over the same body buffer.
///
/// # Examples
///
/// ```
/// use focusflow_agent::http::{Response, ResponseType, StatusCode};
///
/// let response = Response::new(StatusCode::OK)
///     .header("Content-Type", "application/json")
///     .with_type(ResponseType::Basic)
///     .with_body(r#"{"status":"ok"}"#);
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    response_type: ResponseType,
    url: Option<Url>,
    keep_alive: bool,
}

impl Response {
    /// Creates a response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
            response_type: ResponseType::Default,
            url: None,
            keep_alive: true,
        }
    }

    /// A synthetic `200` carrying `body` as text, the way a script-constructed
    /// response with a string body is labelled.
    pub fn text(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK)
            .header("Content-Type", "text/plain;charset=UTF-8")
            .with_body(body)
    }

    /// Appends a header. Repeated names are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Records the final URL the response was served from.
    #[must_use]
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Controls whether `Connection: keep-alive` or `Connection: close` is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Returns a second response sharing this one's body buffer.
    pub fn duplicate(&self) -> Self {
        Self {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
            response_type: self.response_type,
            url: self.url.clone(),
            keep_alive: self.keep_alive,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// `true` for any `2xx` status.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// Serializes the response in HTTP/1.1 wire format for the proxy host.
    ///
    /// Hop-by-hop headers carried over from upstream are dropped, and
    /// `Content-Length` and `Connection` are always written fresh.
    pub fn into_bytes(mut self) -> BytesMut {
        let content_length = self.body.len();
        self.headers.strip_hop_by_hop();

        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };
        self.headers.insert("Connection", connection);

        let estimated_size = 128 + self.headers.len() * 64 + content_length;
        let mut buf = BytesMut::with_capacity(estimated_size);

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason().unwrap_or("")
            )
            .as_bytes(),
        );

        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }
        buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());
        buf.put(&b"\r\n"[..]);

        if !self.body.is_empty() {
            buf.put(self.body.as_ref());
        }

        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn text_response_is_synthetic_ok() {
        let r = Response::text("{}");
        assert_eq!(r.status(), StatusCode::OK);
        assert_eq!(r.response_type(), ResponseType::Default);
        assert_eq!(r.headers().get("content-type"), Some("text/plain;charset=UTF-8"));
    }

    #[test]
    fn upstream_framing_is_rewritten() {
        let r = Response::new(StatusCode::OK)
            .header("Transfer-Encoding", "chunked")
            .header("Content-Length", "999")
            .with_body("Hello");
        let s = to_string(r.into_bytes());
        assert!(!s.contains("Transfer-Encoding"));
        assert!(!s.contains("Content-Length: 999"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn unknown_status_has_empty_reason() {
        let r = Response::new(StatusCode::from_u16(299));
        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 299 \r\n"));
    }

    #[test]
    fn connection_close() {
        let r = Response::new(StatusCode::BAD_GATEWAY).keep_alive(false);
        let s = to_string(r.into_bytes());
        assert!(s.contains("Connection: close\r\n"));
    }

    #[test]
    fn duplicate_preserves_metadata() {
        let url = Url::parse("http://localhost:3000/manifest.json").unwrap();
        let r = Response::new(StatusCode::OK)
            .with_type(ResponseType::Basic)
            .with_url(url.clone())
            .with_body("{}");
        let copy = r.duplicate();
        assert_eq!(copy.status(), r.status());
        assert_eq!(copy.response_type(), ResponseType::Basic);
        assert_eq!(copy.url(), Some(&url));
        assert_eq!(copy.body(), r.body());
    }
}
