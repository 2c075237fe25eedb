//! Scripted collaborators shared by the unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::future::BoxFuture;
use url::Url;

use crate::config::AgentConfig;
use crate::http::{Method, Request, Response, ResponseType, StatusCode};
use crate::network::{Fetch, NetworkError};
use crate::notify::{Notification, Notifier, NotifyError, WindowClients};

pub const ORIGIN: &str = "http://localhost:3000";

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// Scripts a successful answer for every default shell asset. The root
/// document's body is `<html>shell</html>`.
pub fn script_shell(network: &MockNetwork) {
    for asset in AgentConfig::default().shell_assets {
        let response_type = if asset.starts_with('/') {
            ResponseType::Basic
        } else {
            ResponseType::Cors
        };
        let body = if asset == "/" { "<html>shell</html>" } else { "asset" };
        network.respond(&asset, StatusCode::OK, response_type, body);
    }
}

enum Route {
    Respond {
        status: StatusCode,
        response_type: ResponseType,
        body: Bytes,
    },
    Fail,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: Url,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// A network that answers from a script and records every request.
/// Unscripted URLs reject.
#[derive(Clone, Default)]
pub struct MockNetwork {
    routes: Arc<Mutex<HashMap<Url, Route>>>,
    log: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(
        &self,
        path: &str,
        status: StatusCode,
        response_type: ResponseType,
        body: &'static str,
    ) {
        self.routes.lock().unwrap().insert(
            url(path),
            Route::Respond {
                status,
                response_type,
                body: Bytes::from_static(body.as_bytes()),
            },
        );
    }

    pub fn fail(&self, path: &str) {
        self.routes.lock().unwrap().insert(url(path), Route::Fail);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.log.lock().unwrap().clone()
    }

    /// Number of requests issued for `path`.
    pub fn hits(&self, path: &str) -> usize {
        let target = url(path);
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url == target)
            .count()
    }
}

impl Fetch for MockNetwork {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetworkError>> {
        self.log.lock().unwrap().push(RecordedRequest {
            method: request.method().clone(),
            url: request.url().clone(),
            content_type: request.headers().get("content-type").map(str::to_owned),
            body: request.body().clone(),
        });

        let result = match self.routes.lock().unwrap().get(request.url()) {
            Some(Route::Respond {
                status,
                response_type,
                body,
            }) => Ok(Response::new(*status)
                .with_type(*response_type)
                .with_url(request.url().clone())
                .with_body(body.clone())),
            Some(Route::Fail) | None => Err(NetworkError::Unreachable(request.url().to_string())),
        };
        Box::pin(async move { result })
    }
}

/// Records shown and closed notifications.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    pub shown: Arc<Mutex<Vec<Notification>>>,
    pub closed: Arc<Mutex<Vec<Notification>>>,
}

impl Notifier for RecordingNotifier {
    fn show(&self, notification: Notification) -> BoxFuture<'_, Result<(), NotifyError>> {
        self.shown.lock().unwrap().push(notification);
        Box::pin(async { Ok(()) })
    }

    fn close<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<(), NotifyError>> {
        self.closed.lock().unwrap().push(notification.clone());
        Box::pin(async { Ok(()) })
    }
}

/// Records opened windows.
#[derive(Clone, Default)]
pub struct RecordingClients {
    pub opened: Arc<Mutex<Vec<Url>>>,
}

impl WindowClients for RecordingClients {
    fn open_window<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<(), NotifyError>> {
        self.opened.lock().unwrap().push(url.clone());
        Box::pin(async { Ok(()) })
    }
}
