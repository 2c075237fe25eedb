//! Outgoing fetch requests, and parsing them off the wire for the proxy host.
//!
//! Only `Content-Length` framing is understood on the wire. A request carrying
//! `Transfer-Encoding` is rejected with [`RequestError::UnsupportedFraming`].

use std::num::IntErrorKind;
use std::str;

use bytes::Bytes;
use thiserror::Error;
use url::Url;

use super::{Headers, Method};

/// What the requesting page intends to do with the response.
///
/// Only [`Destination::Document`] changes interception behavior: a failed
/// navigation falls back to the cached application shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
    /// A full-page navigation.
    Document,
    Script,
    Style,
    Image,
    Font,
    Manifest,
    /// A `fetch()` or XHR call from page code.
    #[default]
    Empty,
}

impl Destination {
    /// Maps a `Sec-Fetch-Dest` header value. Unrecognized values map to `Empty`.
    pub fn from_fetch_dest(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "document" | "iframe" | "frame" => Self::Document,
            "script" | "worker" | "sharedworker" => Self::Script,
            "style" => Self::Style,
            "image" => Self::Image,
            "font" => Self::Font,
            "manifest" => Self::Manifest,
            _ => Self::Empty,
        }
    }
}

/// Largest request, headers and body together, the proxy host will buffer (8 MiB).
pub const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Errors that can occur while parsing a request off the wire.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("request target cannot be resolved: {0}")]
    Target(#[from] url::ParseError),

    #[error("invalid Content-Length: {0:?}")]
    ContentLength(String),

    #[error("declared body of {declared} bytes exceeds the {max} byte limit", max = MAX_REQUEST_SIZE)]
    TooLarge { declared: String },

    #[error("unsupported Transfer-Encoding: {0}")]
    UnsupportedFraming(String),
}

/// A fetch request addressed by absolute URL.
///
/// `Request` is deliberately not `Clone`: like a platform request its body is
/// meant to be consumed once. Code that needs to both send a request and keep
/// using it calls [`duplicate`](Self::duplicate) first; the copy shares the
/// body buffer.
///
/// # Examples
///
/// ```
/// use focusflow_agent::http::{Destination, Method, Request};
/// use url::Url;
///
/// let url = Url::parse("http://localhost:3000/static/css/main.css").unwrap();
/// let request = Request::get(url).with_destination(Destination::Style);
/// let copy = request.duplicate();
///
/// assert_eq!(copy.method(), &Method::Get);
/// assert_eq!(copy.url(), request.url());
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    url: Url,
    headers: Headers,
    body: Bytes,
    destination: Destination,
}

impl Request {
    const MAX_HEADERS: usize = 64;

    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Headers::new(),
            body: Bytes::new(),
            destination: Destination::default(),
        }
    }

    /// A body-less `GET` for `url`.
    pub fn get(url: Url) -> Self {
        Self::new(Method::Get, url)
    }

    /// A `GET` navigation for `url`.
    pub fn navigate(url: Url) -> Self {
        Self::get(url).with_destination(Destination::Document)
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Parses one HTTP/1.x request from `buf`, resolving its target against `base`.
    ///
    /// Returns the request and the number of bytes it occupied, body included.
    /// The destination is taken from `Sec-Fetch-Dest` when the client sends it.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: the headers or the declared body are
    ///   not fully buffered yet.
    /// - [`RequestError::Parse`]: the data is malformed.
    /// - [`RequestError::MissingField`]: method or path is absent.
    /// - [`RequestError::Target`]: the path does not form a valid URL.
    /// - [`RequestError::ContentLength`]: `Content-Length` is not a number.
    /// - [`RequestError::TooLarge`]: the declared body does not fit in
    ///   [`MAX_REQUEST_SIZE`].
    /// - [`RequestError::UnsupportedFraming`]: the body uses `Transfer-Encoding`.
    pub fn parse(buf: &[u8], base: &Url) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method: Method = match raw_req.method {
            Some(m) => m.parse().unwrap_or_else(|never| match never {}),
            None => return Err(RequestError::MissingField { field: "method" }),
        };
        let path = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;
        let url = base.join(path)?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        if let Some(encoding) = header_map.get("transfer-encoding") {
            return Err(RequestError::UnsupportedFraming(encoding.to_owned()));
        }

        let content_length = match header_map.get("content-length") {
            Some(value) => parse_content_length(value)?,
            None => 0,
        };
        let consumed = body_offset
            .checked_add(content_length)
            .filter(|&total| total <= MAX_REQUEST_SIZE)
            .ok_or_else(|| RequestError::TooLarge {
                declared: content_length.to_string(),
            })?;
        if buf.len() < consumed {
            return Err(RequestError::Incomplete);
        }

        let destination = header_map
            .get("sec-fetch-dest")
            .map(Destination::from_fetch_dest)
            .unwrap_or_default();

        Ok((
            Self {
                method,
                url,
                headers: header_map,
                body: Bytes::copy_from_slice(&buf[body_offset..consumed]),
                destination,
            },
            consumed,
        ))
    }

    /// Returns a second request sharing this one's body buffer.
    pub fn duplicate(&self) -> Self {
        Self {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            destination: self.destination,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Whether this request is a full-page navigation.
    pub fn is_navigation(&self) -> bool {
        self.destination == Destination::Document
    }

    /// Returns `true` if the connection should be kept alive after this request.
    pub fn is_keep_alive(&self) -> bool {
        self.headers
            .get("connection")
            .is_none_or(|conn| !conn.eq_ignore_ascii_case("close"))
    }
}

fn parse_content_length(value: &str) -> Result<usize, RequestError> {
    let value = value.trim();
    value.parse().map_err(|e: std::num::ParseIntError| match e.kind() {
        IntErrorKind::PosOverflow => RequestError::TooLarge {
            declared: value.to_owned(),
        },
        _ => RequestError::ContentLength(value.to_owned()),
    })
}
