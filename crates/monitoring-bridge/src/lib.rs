//! Monitoring-bridge receives lifecycle events of the orchestrator, and
//! reflects them into the monitoring backend as events and problem comments.

pub mod cloudevent;
pub mod config;
pub mod handlers;
pub mod processor;
pub mod registry;
pub mod server;

use anyhow::Context;
use correlation::{credentials, DatastoreClient, EnvReader, KubernetesSecretReader};
use futures::FutureExt;
use std::sync::Arc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

const USER_AGENT: &str = concat!("monitoring-bridge/", env!("CARGO_PKG_VERSION"));

#[derive(clap::Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Port to listen on for inbound events.
    #[clap(long, env = "LISTEN_PORT", default_value = "8080")]
    pub listen_port: u16,
    /// Namespace of credential secrets.
    #[clap(long, env = "POD_NAMESPACE", default_value = "keptn")]
    pub namespace: String,
    /// Timeout of each outbound request.
    #[clap(long, env = "REQUEST_TIMEOUT", default_value = "30s", value_parser = humantime::parse_duration)]
    pub request_timeout: std::time::Duration,
    /// Timeout of processing each inbound event.
    #[clap(long, env = "EVENT_TIMEOUT", default_value = "2m", value_parser = humantime::parse_duration)]
    pub event_timeout: std::time::Duration,
    /// Emit logs as JSON rather than human-readable text.
    #[clap(long, env = "LOG_JSON")]
    pub log_json: bool,
}

/// Run the bridge until a shutdown signal, then drain in-flight events.
pub async fn run(args: Args) -> anyhow::Result<()> {
    tracing::info!(?args, "started!");

    let http_client = correlation::rest::new_http_client(USER_AGENT, args.request_timeout)?;
    let secrets = KubernetesSecretReader::try_default(&args.namespace)
        .await
        .context("building secret reader")?;
    let keptn = credentials::resolve_keptn_credentials(&EnvReader, &secrets)
        .await
        .context("resolving orchestrator credentials")?;

    let registry = registry::Registry::new();
    tracing::info!(
        event_types = ?registry.event_types().collect::<Vec<_>>(),
        "handling event types"
    );

    let processor = Arc::new(processor::Processor::new(
        EnvReader,
        secrets,
        DatastoreClient::new(http_client.clone(), &keptn),
        config::ResourceClient::new(http_client.clone(), &keptn),
        http_client,
        registry,
    ));
    let process: server::ProcessFn = Arc::new(move |event: correlation::KeptnEvent| {
        let processor = processor.clone();
        async move { processor.process(event).await }.boxed()
    });

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("caught shutdown signal, stopping..."),
            Err(err) => tracing::error!(?err, "error subscribing to shutdown signal"),
        }
        signal.cancel();
    });

    let tracker = TaskTracker::new();
    let app = server::router(process, tracker.clone(), args.event_timeout)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(format!("[::]:{}", args.listen_port))
        .await
        .context("failed to bind server port")?;
    tracing::info!(port = args.listen_port, "listening for events");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("HTTP server failed")?;

    tracker.close();
    tracing::info!(in_flight = tracker.len(), "waiting for in-flight events");
    tracker.wait().await;

    tracing::info!("shut down cleanly");
    Ok(())
}
