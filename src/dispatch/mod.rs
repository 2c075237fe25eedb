//! Event dispatch table.
//!
//! The host delivers platform events as [`Event`] values; [`Dispatcher`] maps
//! each [`EventKind`] to exactly one handler and returns a future the host
//! awaits for as long as the event should stay alive. The table is built once
//! at start-up with [`Dispatcher::for_agent`]; kinds with no registered handler
//! complete immediately with [`EventOutcome::Ignored`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tracing::debug;

use crate::agent::{Agent, FetchOutcome};
use crate::background::SyncReport;
use crate::http::Request;
use crate::notify::Notification;

/// A platform event delivered to the agent.
#[derive(Debug)]
pub enum Event {
    Install,
    Activate,
    Fetch(Request),
    Message(Value),
    /// A push, with its payload if one was sent.
    Push(Option<Bytes>),
    NotificationClick {
        notification: Notification,
        action: Option<String>,
    },
    Sync {
        tag: String,
    },
}

/// Discriminant of [`Event`], used as the dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Message,
    Push,
    NotificationClick,
    Sync,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Install => EventKind::Install,
            Self::Activate => EventKind::Activate,
            Self::Fetch(_) => EventKind::Fetch,
            Self::Message(_) => EventKind::Message,
            Self::Push(_) => EventKind::Push,
            Self::NotificationClick { .. } => EventKind::NotificationClick,
            Self::Sync { .. } => EventKind::Sync,
        }
    }
}

/// What handling an event produced.
#[derive(Debug)]
pub enum EventOutcome {
    /// The handler ran to completion.
    Completed,
    /// A fetch event's answer.
    Fetch(FetchOutcome),
    /// A sync pass finished.
    Synced(SyncReport),
    /// No handler is registered for this kind of event.
    Ignored,
}

/// Type-erased async event handler.
pub type Handler =
    Arc<dyn Fn(Event) -> Pin<Box<dyn Future<Output = EventOutcome> + Send>> + Send + Sync + 'static>;

/// Conversion trait for async handler functions, so registration accepts
/// plain closures.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, event: Event) -> Pin<Box<dyn Future<Output = EventOutcome> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Event) -> F + Send + Sync + 'static,
    F: Future<Output = EventOutcome> + Send + 'static,
{
    fn call(&self, event: Event) -> Pin<Box<dyn Future<Output = EventOutcome> + Send>> {
        Box::pin((self)(event))
    }
}

/// Maps event kinds to handlers.
#[derive(Default, Clone)]
pub struct Dispatcher {
    handlers: HashMap<EventKind, Handler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the table that routes every event kind to `agent`.
    pub fn for_agent(agent: Arc<Agent>) -> Self {
        let mut dispatcher = Self::new();

        let a = Arc::clone(&agent);
        dispatcher.on(EventKind::Install, move |_: Event| {
            let agent = Arc::clone(&a);
            async move {
                agent.install().await;
                EventOutcome::Completed
            }
        });

        let a = Arc::clone(&agent);
        dispatcher.on(EventKind::Activate, move |_: Event| {
            let agent = Arc::clone(&a);
            async move {
                agent.activate().await;
                EventOutcome::Completed
            }
        });

        let a = Arc::clone(&agent);
        dispatcher.on(EventKind::Fetch, move |event: Event| {
            let agent = Arc::clone(&a);
            async move {
                match event {
                    Event::Fetch(request) => EventOutcome::Fetch(agent.handle_fetch(request).await),
                    _ => EventOutcome::Ignored,
                }
            }
        });

        let a = Arc::clone(&agent);
        dispatcher.on(EventKind::Message, move |event: Event| {
            let agent = Arc::clone(&a);
            async move {
                if let Event::Message(data) = event {
                    agent.handle_message(&data).await;
                }
                EventOutcome::Completed
            }
        });

        let a = Arc::clone(&agent);
        dispatcher.on(EventKind::Push, move |event: Event| {
            let agent = Arc::clone(&a);
            async move {
                if let Event::Push(payload) = event {
                    agent.handle_push(payload.as_deref()).await;
                }
                EventOutcome::Completed
            }
        });

        let a = Arc::clone(&agent);
        dispatcher.on(EventKind::NotificationClick, move |event: Event| {
            let agent = Arc::clone(&a);
            async move {
                if let Event::NotificationClick {
                    notification,
                    action,
                } = event
                {
                    agent
                        .handle_notification_click(&notification, action.as_deref())
                        .await;
                }
                EventOutcome::Completed
            }
        });

        dispatcher.on(EventKind::Sync, move |event: Event| {
            let agent = Arc::clone(&agent);
            async move {
                match event {
                    Event::Sync { tag } => EventOutcome::Synced(agent.handle_sync(&tag).await),
                    _ => EventOutcome::Ignored,
                }
            }
        });

        dispatcher
    }

    /// Registers `handler` for `kind`, replacing any previous handler.
    pub fn on(&mut self, kind: EventKind, handler: impl IntoHandler) -> &mut Self {
        let handler = Arc::new(handler);
        self.handlers
            .insert(kind, Arc::new(move |event: Event| handler.call(event)));
        self
    }

    pub fn handles(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Runs the handler registered for the event's kind.
    pub async fn dispatch(&self, event: Event) -> EventOutcome {
        let kind = event.kind();
        match self.handlers.get(&kind) {
            Some(handler) => {
                debug!(?kind, "dispatching event");
                handler(event).await
            }
            None => EventOutcome::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheKey;
    use crate::config::AgentConfig;
    use crate::http::{ResponseType, StatusCode};
    use crate::testing::{MockNetwork, RecordingNotifier, script_shell, url};
    use serde_json::json;

    fn dispatcher_with(network: &MockNetwork) -> (Arc<Agent>, Dispatcher) {
        let agent = Arc::new(Agent::new(AgentConfig::default(), Arc::new(network.clone())));
        let dispatcher = Dispatcher::for_agent(Arc::clone(&agent));
        (agent, dispatcher)
    }

    #[test]
    fn every_kind_is_registered() {
        let (_, dispatcher) = dispatcher_with(&MockNetwork::new());
        for kind in [
            EventKind::Install,
            EventKind::Activate,
            EventKind::Fetch,
            EventKind::Message,
            EventKind::Push,
            EventKind::NotificationClick,
            EventKind::Sync,
        ] {
            assert!(dispatcher.handles(kind), "{kind:?} has no handler");
        }
    }

    #[tokio::test]
    async fn empty_table_ignores_events() {
        let dispatcher = Dispatcher::new();
        assert!(matches!(
            dispatcher.dispatch(Event::Install).await,
            EventOutcome::Ignored
        ));
    }

    #[tokio::test]
    async fn custom_handler_replaces_default() {
        let (_, mut dispatcher) = dispatcher_with(&MockNetwork::new());
        dispatcher.on(EventKind::Sync, |_: Event| async {
            EventOutcome::Synced(SyncReport {
                submitted: 9,
                failed: 0,
            })
        });
        let outcome = dispatcher
            .dispatch(Event::Sync {
                tag: "anything".into(),
            })
            .await;
        assert!(matches!(outcome, EventOutcome::Synced(r) if r.submitted == 9));
    }

    #[tokio::test]
    async fn lifecycle_then_fetch_serves_from_cache() {
        let network = MockNetwork::new();
        script_shell(&network);
        network.respond("/favicon.ico", StatusCode::OK, ResponseType::Basic, "ico");
        let (agent, dispatcher) = dispatcher_with(&network);

        dispatcher.dispatch(Event::Install).await;
        dispatcher.dispatch(Event::Activate).await;
        for _ in 0..2 {
            let outcome = dispatcher
                .dispatch(Event::Fetch(Request::get(url("/manifest.json"))))
                .await;
            assert!(matches!(outcome, EventOutcome::Fetch(FetchOutcome::Respond(_))));
            dispatcher
                .dispatch(Event::Fetch(Request::get(url("/favicon.ico"))))
                .await;
            agent.settle().await;
        }

        assert_eq!(network.hits("/manifest.json"), 1);
        assert_eq!(network.hits("/favicon.ico"), 1);
    }

    #[tokio::test]
    async fn message_event_reaches_plan_bucket() {
        let (agent, dispatcher) = dispatcher_with(&MockNetwork::new());
        dispatcher
            .dispatch(Event::Message(json!({ "type": "CACHE_PLAN", "plan": { "tasks": [] } })))
            .await;
        let stored = agent
            .caches()
            .match_key(&CacheKey::get(url("/api/plan/today")))
            .await;
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn push_event_reaches_notifier() {
        let network = MockNetwork::new();
        let notifier = RecordingNotifier::default();
        let agent = Arc::new(
            Agent::new(AgentConfig::default(), Arc::new(network))
                .with_notifier(Arc::new(notifier.clone())),
        );
        let dispatcher = Dispatcher::for_agent(agent);

        dispatcher
            .dispatch(Event::Push(Some(Bytes::from_static(br#"{"title":"Focus"}"#))))
            .await;

        assert_eq!(notifier.shown.lock().unwrap()[0].title, "Focus");
    }
}
