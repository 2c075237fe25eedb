//! Header list with case-insensitive name lookup.

/// Hop-by-hop headers that describe a single connection rather than the
/// resource, and so are never stored with a cached entry or relayed.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
];

/// An order-preserving, multi-value header list.
///
/// # Examples
///
/// ```
/// use focusflow_agent::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Content-Type", "text/css");
/// headers.insert("Connection", "keep-alive");
/// headers.strip_hop_by_hop();
///
/// assert_eq!(headers.get("content-type"), Some("text/css"));
/// assert!(!headers.contains("connection"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Appends an entry. Repeated names keep every value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.push((name.into(), value.into()));
    }

    /// Returns the first value for `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Removes all entries named `name`; returns `true` if any were removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.inner.len();
        self.inner.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.inner.len() < before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Drops connection-scoped headers and any framing the writer recomputes.
    pub fn strip_hop_by_hop(&mut self) {
        self.inner.retain(|(k, _)| {
            !HOP_BY_HOP.iter().any(|h| k.eq_ignore_ascii_case(h))
                && !k.eq_ignore_ascii_case("content-length")
        });
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterates `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
