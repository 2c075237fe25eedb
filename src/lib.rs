//! # focusflow-agent
//!
//! An offline-first request interceptor for the FocusFlow single-page app.
//!
//! The [`Agent`] decides, per request, whether to answer from a named cache
//! bucket, fetch from the network and populate the cache, or bypass caching
//! entirely. It also keeps a single "today's plan" snapshot, submits tasks
//! created offline, and turns push payloads into notifications.
//!
//! Platform services are injected: the network behind [`network::Fetch`],
//! pending tasks behind [`background::TaskStore`], and notifications and
//! windows behind [`notify::Notifier`] and [`notify::WindowClients`]. The
//! [`server`] module hosts the agent as a local HTTP proxy.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use focusflow_agent::{Agent, AgentConfig, Dispatcher, Event};
//! use focusflow_agent::network::HttpClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AgentConfig::default();
//!     let network = Arc::new(HttpClient::new(config.origin.clone())?);
//!     let dispatcher = Dispatcher::for_agent(Arc::new(Agent::new(config, network)));
//!     dispatcher.dispatch(Event::Install).await;
//!     dispatcher.dispatch(Event::Activate).await;
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod background;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod http;
pub mod network;
pub mod notify;
pub mod server;

#[cfg(test)]
mod testing;

pub use agent::{Agent, AgentError, FetchOutcome};
pub use config::AgentConfig;
pub use dispatch::{Dispatcher, Event, EventKind, EventOutcome};
pub use http::{Headers, Method, Request, Response, StatusCode};
