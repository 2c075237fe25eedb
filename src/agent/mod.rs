//! The request interceptor and cache manager.
//!
//! [`Agent`] owns the cache policy and one handler per platform event. Every
//! handler swallows its own failures after logging them; nothing propagates
//! back to the host except the fetch outcome.
//!
//! | Event              | Effect                                                     |
//! |--------------------|------------------------------------------------------------|
//! | install            | populate the shell bucket, all-or-nothing                  |
//! | activate           | delete every bucket except the current shell generation    |
//! | fetch              | cache-first for `GET`, network-only for the API marker     |
//! | message            | overwrite the plan snapshot on `CACHE_PLAN`                |
//! | sync               | submit pending tasks                                       |
//! | push               | show a notification                                        |
//! | notification click | close it, then open the app unless dismissed               |

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::background::{EmptyTaskStore, SyncReport, TaskStore, TaskStoreError, sync_pending};
use crate::cache::{CacheError, CacheKey, CacheStorage};
use crate::config::AgentConfig;
use crate::http::{Method, Request, Response, ResponseType, StatusCode};
use crate::network::Fetch;
use crate::notify::{
    CLOSE_ACTION, Notification, Notifier, NotifyError, TracingClients, TracingNotifier,
    WindowClients,
};

/// Message type that carries a plan snapshot.
pub const CACHE_PLAN_MESSAGE: &str = "CACHE_PLAN";

/// Failures inside event handlers. These are logged, never returned to the host.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Tasks(#[from] TaskStoreError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// What the host should do with an intercepted request.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The agent did not intervene; the host performs its normal fetch.
    Passthrough,
    /// Answer with this response.
    Respond(Response),
    /// The agent intervened but has nothing to answer with.
    Unresolved,
}

impl FetchOutcome {
    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::Respond(response) => Some(response),
            Self::Passthrough | Self::Unresolved => None,
        }
    }
}

/// The interceptor and its collaborators.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use focusflow_agent::{Agent, AgentConfig, network::HttpClient};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let config = AgentConfig::default();
/// let network = Arc::new(HttpClient::new(config.origin.clone())?);
/// let agent = Agent::new(config, network);
/// agent.install().await;
/// agent.activate().await;
/// # Ok(())
/// # }
/// ```
pub struct Agent {
    config: Arc<AgentConfig>,
    caches: CacheStorage,
    network: Arc<dyn Fetch>,
    tasks: Arc<dyn TaskStore>,
    notifier: Arc<dyn Notifier>,
    clients: Arc<dyn WindowClients>,
    // Background cache writes not yet awaited by `settle`.
    pending_writes: Mutex<JoinSet<()>>,
}

impl Agent {
    /// Creates an agent with empty cache storage, the empty task store, and
    /// log-only notification services.
    pub fn new(config: AgentConfig, network: Arc<dyn Fetch>) -> Self {
        Self {
            config: Arc::new(config),
            caches: CacheStorage::new(),
            network,
            tasks: Arc::new(EmptyTaskStore),
            notifier: Arc::new(TracingNotifier),
            clients: Arc::new(TracingClients),
            pending_writes: Mutex::new(JoinSet::new()),
        }
    }

    #[must_use]
    pub fn with_caches(mut self, caches: CacheStorage) -> Self {
        self.caches = caches;
        self
    }

    #[must_use]
    pub fn with_task_store(mut self, tasks: Arc<dyn TaskStore>) -> Self {
        self.tasks = tasks;
        self
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub fn with_clients(mut self, clients: Arc<dyn WindowClients>) -> Self {
        self.clients = clients;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn caches(&self) -> &CacheStorage {
        &self.caches
    }

    /// Populates the shell bucket. A failed population is logged and
    /// otherwise ignored; installation proceeds either way.
    pub async fn install(&self) {
        if let Err(e) = self.populate_shell().await {
            warn!(error = %e, "cache install failed");
        }
    }

    async fn populate_shell(&self) -> Result<(), AgentError> {
        let bucket = self.caches.open(&self.config.caches.shell).await;
        info!(cache = %bucket.name(), "opened cache");
        let urls = self.config.shell_asset_urls()?;
        bucket.add_all(self.network.as_ref(), &urls).await?;
        Ok(())
    }

    /// Deletes every bucket whose name is not the current shell bucket (or
    /// explicitly retained). With the default configuration this includes the
    /// plan snapshot bucket.
    pub async fn activate(&self) {
        let shell = &self.config.caches.shell;
        for name in self.caches.keys().await {
            if &name == shell || self.config.caches.retained.contains(&name) {
                continue;
            }
            info!(cache = %name, "deleting old cache");
            self.caches.delete(&name).await;
        }
    }

    /// Decides how to answer `request`.
    pub async fn handle_fetch(&self, request: Request) -> FetchOutcome {
        if request.method() != &Method::Get {
            return FetchOutcome::Passthrough;
        }

        if request.url().as_str().contains(&self.config.api_marker) {
            debug!(url = %request.url(), "api request, bypassing cache");
            return match self.network.fetch(request).await {
                Ok(response) => FetchOutcome::Respond(response),
                Err(e) => {
                    warn!(error = %e, "api request failed");
                    FetchOutcome::Unresolved
                }
            };
        }

        let key = CacheKey::from(&request);
        if let Some(cached) = self.caches.match_key(&key).await {
            debug!(key = %key, "cache hit");
            return FetchOutcome::Respond(cached);
        }
        debug!(key = %key, "cache miss");

        match self.network.fetch(request.duplicate()).await {
            Ok(response) => {
                if response.status() != StatusCode::OK
                    || response.response_type() != ResponseType::Basic
                {
                    return FetchOutcome::Respond(response);
                }
                self.store_in_background(key, response.duplicate()).await;
                FetchOutcome::Respond(response)
            }
            Err(e) => {
                debug!(key = %key, error = %e, "network fetch failed");
                if request.is_navigation() {
                    self.offline_fallback().await
                } else {
                    FetchOutcome::Unresolved
                }
            }
        }
    }

    async fn offline_fallback(&self) -> FetchOutcome {
        let url = match self.config.resolve(&self.config.offline_fallback) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "invalid offline fallback");
                return FetchOutcome::Unresolved;
            }
        };
        match self.caches.match_key(&CacheKey::get(url)).await {
            Some(shell) => FetchOutcome::Respond(shell),
            None => FetchOutcome::Unresolved,
        }
    }

    // The caller gets its response without waiting on the write.
    async fn store_in_background(&self, key: CacheKey, response: Response) {
        let caches = self.caches.clone();
        let shell = self.config.caches.shell.clone();
        let mut writes = self.pending_writes.lock().await;
        while writes.try_join_next().is_some() {}
        writes.spawn(async move {
            caches.open(&shell).await.put(key, response).await;
        });
    }

    /// Waits for every background cache write started so far.
    pub async fn settle(&self) {
        let mut writes = std::mem::take(&mut *self.pending_writes.lock().await);
        while let Some(result) = writes.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "background cache write aborted");
            }
        }
    }

    /// Handles an out-of-band message. Only `CACHE_PLAN` is understood.
    pub async fn handle_message(&self, data: &Value) {
        if data.get("type").and_then(Value::as_str) != Some(CACHE_PLAN_MESSAGE) {
            debug!("ignoring message");
            return;
        }
        if let Err(e) = self.cache_plan(data.get("plan")).await {
            warn!(error = %e, "failed to cache plan");
        }
    }

    async fn cache_plan(&self, plan: Option<&Value>) -> Result<(), AgentError> {
        let body = match plan {
            Some(plan) => serde_json::to_vec(plan)?,
            None => Vec::new(),
        };
        let key = CacheKey::get(self.config.resolve(&self.config.plan_key)?);
        let bucket = self.caches.open(&self.config.caches.plans).await;
        bucket.put(key, Response::text(body)).await;
        Ok(())
    }

    /// Handles a background sync event. Tags other than the configured one
    /// are ignored and report nothing.
    pub async fn handle_sync(&self, tag: &str) -> SyncReport {
        if tag != self.config.sync.tag {
            debug!(tag = %tag, "ignoring sync tag");
            return SyncReport::default();
        }
        match self.sync_tasks().await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "background sync failed");
                SyncReport::default()
            }
        }
    }

    async fn sync_tasks(&self) -> Result<SyncReport, AgentError> {
        let endpoint = self.config.resolve(&self.config.sync.endpoint)?;
        Ok(sync_pending(self.tasks.as_ref(), self.network.as_ref(), &endpoint).await?)
    }

    /// Shows a notification for a push payload. A push without a payload
    /// shows nothing.
    pub async fn handle_push(&self, payload: Option<&[u8]>) {
        let Some(payload) = payload else {
            return;
        };
        if let Err(e) = self.show_push(payload).await {
            warn!(error = %e, "failed to show notification");
        }
    }

    async fn show_push(&self, payload: &[u8]) -> Result<(), AgentError> {
        let data: Value = serde_json::from_slice(payload)?;
        let now = chrono::Utc::now().timestamp_millis();
        let notification = Notification::from_push(&data, &self.config.notifications, now);
        self.notifier.show(notification).await?;
        Ok(())
    }

    /// Closes the clicked notification and, unless it was dismissed, opens
    /// the application.
    pub async fn handle_notification_click(&self, notification: &Notification, action: Option<&str>) {
        if let Err(e) = self.notifier.close(notification).await {
            warn!(error = %e, "failed to close notification");
        }
        if action == Some(CLOSE_ACTION) {
            return;
        }
        if let Err(e) = self.open_app().await {
            warn!(error = %e, "failed to open window");
        }
    }

    async fn open_app(&self) -> Result<(), AgentError> {
        let url = self.config.resolve(&self.config.notifications.start_url)?;
        self.clients.open_window(&url).await?;
        Ok(())
    }
}
