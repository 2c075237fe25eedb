//! Background sync of tasks created while offline.
//!
//! The durable queue itself is not implemented: [`EmptyTaskStore`] is what the
//! agent runs with and always reports nothing pending. [`MemoryTaskStore`]
//! exists so the submission path can be exercised.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::http::{Method, Request};
use crate::network::Fetch;

/// Errors reported by a [`TaskStore`].
#[derive(Debug, Error)]
pub enum TaskStoreError {
    #[error("task store unavailable: {0}")]
    Unavailable(String),

    #[error("no pending task with id {0}")]
    UnknownTask(String),
}

/// A unit of work created offline and destined for the task endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTask {
    pub id: String,
    /// Submitted verbatim as the JSON request body.
    pub data: serde_json::Value,
}

/// Storage for pending tasks.
pub trait TaskStore: Send + Sync {
    fn list(&self) -> BoxFuture<'_, Result<Vec<PendingTask>, TaskStoreError>>;

    fn remove<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), TaskStoreError>>;
}

/// The production stub: nothing is ever pending.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyTaskStore;

impl TaskStore for EmptyTaskStore {
    fn list(&self) -> BoxFuture<'_, Result<Vec<PendingTask>, TaskStoreError>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn remove<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), TaskStoreError>> {
        Box::pin(async move {
            debug!(task = %id, "removing pending task");
            Ok(())
        })
    }
}

/// In-memory task store, ordered by id.
#[derive(Debug, Default, Clone)]
pub struct MemoryTaskStore {
    tasks: Arc<Mutex<BTreeMap<String, PendingTask>>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, task: PendingTask) {
        self.tasks.lock().await.insert(task.id.clone(), task);
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }
}

impl TaskStore for MemoryTaskStore {
    fn list(&self) -> BoxFuture<'_, Result<Vec<PendingTask>, TaskStoreError>> {
        Box::pin(async move { Ok(self.tasks.lock().await.values().cloned().collect()) })
    }

    fn remove<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), TaskStoreError>> {
        Box::pin(async move {
            self.tasks
                .lock()
                .await
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| TaskStoreError::UnknownTask(id.to_owned()))
        })
    }
}

/// Outcome of one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Accepted by the endpoint and removed from the store.
    pub submitted: usize,
    /// Rejected, unreachable, or not removable; left for the next pass.
    pub failed: usize,
}

/// Submits every pending task to `endpoint`, one at a time.
///
/// A task is removed only after a `2xx` answer. Failures are logged per task
/// and do not stop the pass. Only a failure to list the queue is returned.
pub async fn sync_pending(
    store: &dyn TaskStore,
    network: &dyn Fetch,
    endpoint: &Url,
) -> Result<SyncReport, TaskStoreError> {
    let tasks = store.list().await?;
    let mut report = SyncReport::default();

    for task in tasks {
        let body = match serde_json::to_vec(&task.data) {
            Ok(body) => body,
            Err(e) => {
                warn!(task = %task.id, error = %e, "failed to sync task");
                report.failed += 1;
                continue;
            }
        };
        let request = Request::new(Method::Post, endpoint.clone())
            .header("Content-Type", "application/json")
            .with_body(body);

        match network.fetch(request).await {
            Ok(response) if response.ok() => match store.remove(&task.id).await {
                Ok(()) => report.submitted += 1,
                Err(e) => {
                    warn!(task = %task.id, error = %e, "failed to sync task");
                    report.failed += 1;
                }
            },
            Ok(response) => {
                debug!(task = %task.id, status = %response.status(), "task not accepted, left pending");
                report.failed += 1;
            }
            Err(e) => {
                warn!(task = %task.id, error = %e, "failed to sync task");
                report.failed += 1;
            }
        }
    }

    if report.submitted + report.failed > 0 {
        info!(submitted = report.submitted, failed = report.failed, "background sync finished");
    }
    Ok(report)
}
