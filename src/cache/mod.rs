//! Named cache buckets keyed by request identity.
//!
//! [`CacheStorage`] is the in-process stand-in for the platform's cache
//! storage: an ordered set of named [`CacheBucket`]s, each mapping a
//! [`CacheKey`] (method + absolute URL) to a stored [`Response`]. Entries
//! never expire; they change only by overwrite or by deleting the whole
//! bucket.
//!
//! Per-key reads and writes are atomic behind each bucket's `RwLock`; no
//! ordering is imposed across buckets or across keys.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::try_join_all;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::http::{Method, Request, Response, StatusCode};
use crate::network::{Fetch, NetworkError};

/// Errors raised while populating a bucket.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("fetching {url} failed: {source}")]
    Fetch {
        url: Url,
        #[source]
        source: NetworkError,
    },

    #[error("{url} answered {status}, refusing to cache")]
    Status { url: Url, status: StatusCode },

    #[error("invalid asset URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// The identity a response is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    method: Method,
    url: Url,
}

impl CacheKey {
    pub fn new(method: Method, url: Url) -> Self {
        Self { method, url }
    }

    /// Key for a `GET` of `url`.
    pub fn get(url: Url) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl From<&Request> for CacheKey {
    fn from(request: &Request) -> Self {
        Self::new(request.method().clone(), request.url().clone())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A single named bucket.
pub struct CacheBucket {
    name: String,
    entries: RwLock<HashMap<CacheKey, Response>>,
}

impl CacheBucket {
    fn new(name: String) -> Self {
        Self {
            name,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a copy of the stored entry for `key`, if any.
    pub async fn match_key(&self, key: &CacheKey) -> Option<Response> {
        self.entries.read().await.get(key).map(Response::duplicate)
    }

    /// Stores `response` under `key`, replacing any previous entry.
    pub async fn put(&self, key: CacheKey, response: Response) {
        debug!(cache = %self.name, key = %key, "storing entry");
        self.entries.write().await.insert(key, response);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Fetches every URL and stores the results, or stores nothing.
    ///
    /// All fetches run concurrently. A network failure or a non-`2xx` status
    /// on any one of them fails the whole call before a single entry is
    /// written.
    pub async fn add_all(&self, network: &dyn Fetch, urls: &[Url]) -> Result<(), CacheError> {
        let fetches = urls.iter().map(|url| async move {
            let response = network
                .fetch(Request::get(url.clone()))
                .await
                .map_err(|source| CacheError::Fetch {
                    url: url.clone(),
                    source,
                })?;
            if !response.ok() {
                return Err(CacheError::Status {
                    url: url.clone(),
                    status: response.status(),
                });
            }
            Ok::<_, CacheError>((CacheKey::get(url.clone()), response))
        });

        let fetched = try_join_all(fetches).await?;

        let mut entries = self.entries.write().await;
        for (key, response) in fetched {
            entries.insert(key, response);
        }
        debug!(cache = %self.name, count = urls.len(), "populated bucket");
        Ok(())
    }
}

impl fmt::Debug for CacheBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBucket")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// The ordered collection of buckets.
///
/// Cloning is cheap and every clone sees the same buckets.
#[derive(Clone, Default)]
pub struct CacheStorage {
    buckets: Arc<RwLock<Vec<Arc<CacheBucket>>>>,
}

impl CacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `name`, creating an empty bucket if it does not exist yet.
    pub async fn open(&self, name: &str) -> Arc<CacheBucket> {
        let mut buckets = self.buckets.write().await;
        if let Some(bucket) = buckets.iter().find(|b| b.name == name) {
            return Arc::clone(bucket);
        }
        let bucket = Arc::new(CacheBucket::new(name.to_owned()));
        buckets.push(Arc::clone(&bucket));
        bucket
    }

    pub async fn has(&self, name: &str) -> bool {
        self.buckets.read().await.iter().any(|b| b.name == name)
    }

    /// Deletes the bucket and all its entries.
    pub async fn delete(&self, name: &str) -> bool {
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        buckets.retain(|b| b.name != name);
        buckets.len() < before
    }

    /// Bucket names in creation order.
    pub async fn keys(&self) -> Vec<String> {
        self.buckets
            .read()
            .await
            .iter()
            .map(|b| b.name.clone())
            .collect()
    }

    /// Looks `key` up in every bucket, oldest first.
    pub async fn match_key(&self, key: &CacheKey) -> Option<Response> {
        let buckets: Vec<Arc<CacheBucket>> = self.buckets.read().await.clone();
        for bucket in buckets {
            if let Some(response) = bucket.match_key(key).await {
                return Some(response);
            }
        }
        None
    }
}

impl fmt::Debug for CacheStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStorage").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ResponseType;
    use crate::testing::MockNetwork;

    fn url(path: &str) -> Url {
        Url::parse("http://localhost:3000").unwrap().join(path).unwrap()
    }

    #[tokio::test]
    async fn open_is_idempotent_and_ordered() {
        let storage = CacheStorage::new();
        storage.open("b").await;
        storage.open("a").await;
        storage.open("b").await;
        assert_eq!(storage.keys().await, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn put_overwrites_single_entry() {
        let storage = CacheStorage::new();
        let bucket = storage.open("plans").await;
        let key = CacheKey::get(url("/api/plan/today"));
        bucket.put(key.clone(), Response::text("one")).await;
        bucket.put(key.clone(), Response::text("two")).await;
        assert_eq!(bucket.len().await, 1);
        let stored = bucket.match_key(&key).await.unwrap();
        assert_eq!(stored.body().as_ref(), b"two");
    }

    #[tokio::test]
    async fn method_is_part_of_identity() {
        let storage = CacheStorage::new();
        let bucket = storage.open("shell").await;
        bucket.put(CacheKey::get(url("/")), Response::text("root")).await;
        let head = CacheKey::new(Method::Head, url("/"));
        assert!(storage.match_key(&head).await.is_none());
    }

    #[tokio::test]
    async fn match_searches_oldest_bucket_first() {
        let storage = CacheStorage::new();
        let key = CacheKey::get(url("/manifest.json"));
        storage.open("old").await.put(key.clone(), Response::text("old")).await;
        storage.open("new").await.put(key.clone(), Response::text("new")).await;
        let hit = storage.match_key(&key).await.unwrap();
        assert_eq!(hit.body().as_ref(), b"old");
    }

    #[tokio::test]
    async fn delete_drops_bucket_contents() {
        let storage = CacheStorage::new();
        let key = CacheKey::get(url("/"));
        storage.open("gone").await.put(key.clone(), Response::text("x")).await;
        assert!(storage.delete("gone").await);
        assert!(!storage.has("gone").await);
        assert!(storage.match_key(&key).await.is_none());
        assert!(!storage.delete("gone").await);
    }

    #[tokio::test]
    async fn add_all_stores_every_asset() {
        let network = MockNetwork::new();
        network.respond("/", StatusCode::OK, ResponseType::Basic, "<html>");
        network.respond("/app.js", StatusCode::OK, ResponseType::Basic, "js");
        let bucket = CacheStorage::new().open("shell").await;

        bucket.add_all(&network, &[url("/"), url("/app.js")]).await.unwrap();

        assert_eq!(bucket.len().await, 2);
        let js = bucket.match_key(&CacheKey::get(url("/app.js"))).await.unwrap();
        assert_eq!(js.body().as_ref(), b"js");
    }

    #[tokio::test]
    async fn add_all_is_all_or_nothing_on_network_failure() {
        let network = MockNetwork::new();
        network.respond("/", StatusCode::OK, ResponseType::Basic, "<html>");
        network.fail("/app.js");
        let bucket = CacheStorage::new().open("shell").await;

        let err = bucket.add_all(&network, &[url("/"), url("/app.js")]).await.unwrap_err();

        assert!(matches!(err, CacheError::Fetch { .. }));
        assert!(bucket.is_empty().await);
    }

    #[tokio::test]
    async fn add_all_rejects_error_status() {
        let network = MockNetwork::new();
        network.respond("/", StatusCode::OK, ResponseType::Basic, "<html>");
        network.respond("/app.js", StatusCode::NOT_FOUND, ResponseType::Basic, "");
        let bucket = CacheStorage::new().open("shell").await;

        let err = bucket.add_all(&network, &[url("/"), url("/app.js")]).await.unwrap_err();

        assert!(matches!(err, CacheError::Status { status, .. } if status == StatusCode::NOT_FOUND));
        assert!(bucket.is_empty().await);
    }
}
