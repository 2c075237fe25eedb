//! Push notification display and click handling.
//!
//! The platform's notification and window services are reached through
//! [`Notifier`] and [`WindowClients`]. The proxy host has neither, so it runs
//! with [`TracingNotifier`] and [`TracingClients`], which only log.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::config::NotificationDefaults;

/// Action id for "View Task".
pub const EXPLORE_ACTION: &str = "explore";
/// Action id for "Dismiss".
pub const CLOSE_ACTION: &str = "close";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification service unavailable: {0}")]
    Unavailable(String),

    #[error("cannot open window {url}: {reason}")]
    Window { url: Url, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    /// Milliseconds since the Unix epoch.
    pub date_of_arrival: i64,
    pub primary_key: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: String,
}

impl Notification {
    /// Builds the notification for a push payload.
    ///
    /// `title`, `body` and `primaryKey` come from the payload when present and
    /// truthy (so `""`, `0`, `false` and `null` fall back); everything else
    /// comes from `defaults`.
    ///
    /// A truthy `title` or `body` that is not a string is rendered as its JSON
    /// text, so `{"a":1}` shows literally rather than as `[object Object]`.
    pub fn from_push(payload: &Value, defaults: &NotificationDefaults, arrived_at_ms: i64) -> Self {
        let text = |field: &str, fallback: &str| {
            payload
                .get(field)
                .filter(|v| is_truthy(v))
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| fallback.to_owned())
        };

        let primary_key = payload
            .get("primaryKey")
            .filter(|v| is_truthy(v))
            .cloned()
            .unwrap_or_else(|| Value::from(1));

        Self {
            title: text("title", &defaults.title),
            body: text("body", &defaults.body),
            icon: defaults.icon.clone(),
            badge: defaults.badge.clone(),
            vibrate: defaults.vibrate.clone(),
            data: NotificationData {
                date_of_arrival: arrived_at_ms,
                primary_key,
            },
            actions: vec![
                NotificationAction {
                    action: EXPLORE_ACTION.to_owned(),
                    title: "View Task".to_owned(),
                    icon: "/check-icon.png".to_owned(),
                },
                NotificationAction {
                    action: CLOSE_ACTION.to_owned(),
                    title: "Dismiss".to_owned(),
                    icon: "/x-icon.png".to_owned(),
                },
            ],
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Displays and dismisses notifications.
pub trait Notifier: Send + Sync {
    fn show(&self, notification: Notification) -> BoxFuture<'_, Result<(), NotifyError>>;

    fn close<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<(), NotifyError>>;
}

/// Focuses or opens application windows.
pub trait WindowClients: Send + Sync {
    fn open_window<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<(), NotifyError>>;
}

/// Logs notifications instead of displaying them.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn show(&self, notification: Notification) -> BoxFuture<'_, Result<(), NotifyError>> {
        Box::pin(async move {
            info!(title = %notification.title, body = %notification.body, "showing notification");
            Ok(())
        })
    }

    fn close<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            info!(title = %notification.title, "closing notification");
            Ok(())
        })
    }
}

/// Logs window requests instead of opening anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingClients;

impl WindowClients for TracingClients {
    fn open_window<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            info!(url = %url, "opening window");
            Ok(())
        })
    }
}
