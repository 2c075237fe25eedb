use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use focusflow_agent::network::{Fetch, HttpClient};
use focusflow_agent::server::Server;
use focusflow_agent::server::proxy::{self, Proxy};
use focusflow_agent::{Agent, AgentConfig, Dispatcher, Event};

#[derive(Parser, Debug)]
#[command(name = "focusflow-agent")]
#[command(about = "Offline-first caching proxy for the FocusFlow web app")]
#[command(version)]
struct Args {
    /// Path to config file (default: ./focusflow.yaml or $XDG_CONFIG_HOME/focusflow/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    listen: Option<String>,

    /// Origin of the application being proxied
    #[arg(short, long)]
    origin: Option<Url>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = AgentConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.host.listen = listen;
    }
    if let Some(origin) = args.origin {
        config.origin = origin;
        config.validate()?;
    }
    let config = Arc::new(config);

    let network: Arc<dyn Fetch> = Arc::new(HttpClient::new(config.origin.clone())?);
    let agent = Arc::new(Agent::new((*config).clone(), Arc::clone(&network)));
    let dispatcher = Arc::new(Dispatcher::for_agent(agent));

    dispatcher.dispatch(Event::Install).await;
    dispatcher.dispatch(Event::Activate).await;
    info!(cache = %config.caches.shell, "agent active");

    let server = Server::bind(&config.host.listen, config.origin.clone()).await?;
    let state = Proxy {
        dispatcher,
        network,
        config,
    };
    server
        .run(move |request| {
            let state = state.clone();
            async move { proxy::route(&state, request).await }
        })
        .await?;

    Ok(())
}
