//! Request handling for the proxy host: the agent's fetch event for ordinary
//! traffic, and event delivery under the control prefix.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, warn};

use crate::agent::FetchOutcome;
use crate::config::AgentConfig;
use crate::dispatch::{Dispatcher, Event, EventOutcome};
use crate::http::{Method, Request, Response, StatusCode};
use crate::network::Fetch;
use crate::notify::Notification;

/// Shared state for [`route`].
#[derive(Clone)]
pub struct Proxy {
    pub dispatcher: Arc<Dispatcher>,
    pub network: Arc<dyn Fetch>,
    pub config: Arc<AgentConfig>,
}

/// Answers one browser request.
pub async fn route(proxy: &Proxy, request: Request) -> Response {
    let path = request.url().path();
    if let Some(endpoint) = path.strip_prefix(proxy.config.host.control_prefix.as_str()) {
        let endpoint = endpoint.to_owned();
        return control(proxy, &endpoint, request).await;
    }

    let mut forwarded = request.duplicate();
    forwarded.headers_mut().remove("host");

    match proxy.dispatcher.dispatch(Event::Fetch(request)).await {
        EventOutcome::Fetch(FetchOutcome::Respond(response)) => response,
        EventOutcome::Fetch(FetchOutcome::Unresolved) => bad_gateway(),
        _ => match proxy.network.fetch(forwarded).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "upstream request failed");
                bad_gateway()
            }
        },
    }
}

fn bad_gateway() -> Response {
    Response::new(StatusCode::BAD_GATEWAY).with_body("Upstream unavailable")
}

async fn control(proxy: &Proxy, endpoint: &str, request: Request) -> Response {
    if request.method() != &Method::Post {
        return Response::new(StatusCode::METHOD_NOT_ALLOWED).header("Allow", "POST");
    }
    let query = |name: &str| {
        request
            .url()
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    };

    let event = match endpoint {
        "message" => match serde_json::from_slice::<Value>(request.body()) {
            Ok(data) => Event::Message(data),
            Err(e) => return bad_request(e),
        },
        "push" => {
            let body = request.body();
            Event::Push((!body.is_empty()).then(|| Bytes::clone(body)))
        }
        "sync" => Event::Sync {
            tag: query("tag").unwrap_or_else(|| proxy.config.sync.tag.clone()),
        },
        "notification-click" => match serde_json::from_slice::<Notification>(request.body()) {
            Ok(notification) => Event::NotificationClick {
                notification,
                action: query("action"),
            },
            Err(e) => return bad_request(e),
        },
        _ => return Response::new(StatusCode::NOT_FOUND).with_body("Unknown agent endpoint"),
    };

    debug!(endpoint, "delivering control event");
    match proxy.dispatcher.dispatch(event).await {
        EventOutcome::Synced(report) => Response::new(StatusCode::ACCEPTED)
            .header("Content-Type", "application/json")
            .with_body(format!(
                r#"{{"submitted":{},"failed":{}}}"#,
                report.submitted, report.failed
            )),
        _ => Response::new(StatusCode::ACCEPTED),
    }
}

fn bad_request(e: serde_json::Error) -> Response {
    Response::new(StatusCode::BAD_REQUEST).with_body(format!("Bad Request: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::cache::CacheKey;
    use crate::http::ResponseType;
    use crate::testing::{MockNetwork, RecordingClients, RecordingNotifier, url};
    use serde_json::json;

    struct Harness {
        proxy: Proxy,
        agent: Arc<Agent>,
        network: MockNetwork,
        notifier: RecordingNotifier,
        clients: RecordingClients,
    }

    fn harness() -> Harness {
        let network = MockNetwork::new();
        let notifier = RecordingNotifier::default();
        let clients = RecordingClients::default();
        let config = AgentConfig::default();
        let agent = Arc::new(
            Agent::new(config.clone(), Arc::new(network.clone()))
                .with_notifier(Arc::new(notifier.clone()))
                .with_clients(Arc::new(clients.clone())),
        );
        let proxy = Proxy {
            dispatcher: Arc::new(Dispatcher::for_agent(Arc::clone(&agent))),
            network: Arc::new(network.clone()),
            config: Arc::new(config),
        };
        Harness {
            proxy,
            agent,
            network,
            notifier,
            clients,
        }
    }

    fn post(path: &str, body: &'static str) -> Request {
        Request::new(Method::Post, url(path)).with_body(body)
    }

    #[tokio::test]
    async fn passthrough_requests_go_to_the_network() {
        let h = harness();
        h.network.respond("/api/tasks", StatusCode::CREATED, ResponseType::Basic, "{}");

        let response = route(&h.proxy, post("/api/tasks", r#"{"title":"x"}"#)).await;

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(h.network.hits("/api/tasks"), 1);
    }

    #[tokio::test]
    async fn unresolved_fetch_is_bad_gateway() {
        let h = harness();
        let response = route(&h.proxy, Request::get(url("/static/js/bundle.js"))).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn message_endpoint_caches_plan() {
        let h = harness();
        let response = route(
            &h.proxy,
            post("/__agent/message", r#"{"type":"CACHE_PLAN","plan":{"tasks":[1]}}"#),
        )
        .await;

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let stored = h
            .agent
            .caches()
            .match_key(&CacheKey::get(url("/api/plan/today")))
            .await
            .unwrap();
        assert_eq!(stored.body().as_ref(), br#"{"tasks":[1]}"#);
        assert!(h.network.requests().is_empty());
    }

    #[tokio::test]
    async fn malformed_message_is_rejected() {
        let h = harness();
        let response = route(&h.proxy, post("/__agent/message", "{oops")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn push_endpoint_shows_notification() {
        let h = harness();
        route(&h.proxy, post("/__agent/push", r#"{"body":"Stretch now"}"#)).await;
        route(&h.proxy, post("/__agent/push", "")).await;

        let shown = h.notifier.shown.lock().unwrap();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].body, "Stretch now");
    }

    #[tokio::test]
    async fn sync_endpoint_reports_counts() {
        let h = harness();
        let response = route(&h.proxy, post("/__agent/sync", "")).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.body().as_ref(), br#"{"submitted":0,"failed":0}"#);
    }

    #[tokio::test]
    async fn notification_click_endpoint_honors_action() {
        let h = harness();
        let notification = Notification::from_push(&json!({}), &h.proxy.config.notifications, 0);
        let body = serde_json::to_vec(&notification).unwrap();

        let dismiss = Request::new(Method::Post, url("/__agent/notification-click?action=close"))
            .with_body(body.clone());
        route(&h.proxy, dismiss).await;
        let tap = Request::new(Method::Post, url("/__agent/notification-click")).with_body(body);
        route(&h.proxy, tap).await;

        assert_eq!(h.notifier.closed.lock().unwrap().len(), 2);
        assert_eq!(*h.clients.opened.lock().unwrap(), vec![url("/")]);
    }

    #[tokio::test]
    async fn control_endpoints_require_post() {
        let h = harness();
        let response = route(&h.proxy, Request::get(url("/__agent/sync"))).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get("allow"), Some("POST"));
    }
}
