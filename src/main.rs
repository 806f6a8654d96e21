use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use relayql::config::{Cli, GatewayConfig};
use relayql::live_schema::{self, LiveSchema};
use relayql::metrics::Metrics;
use relayql::schema_registry::{self, GrpcRegistryConnector, RegistrySubscription};
use relayql::upstream_auth::ActiveDirectoryTokenProvider;
use relayql::{Gateway, HttpQueryExecutor, SchemaConverter, logging, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::load(Cli::parse())?;
    logging::init(config.log_format, &config.log_filter)?;
    tracing::info!(registry = %config.registry_url, listen = %config.listen_addr, "starting gateway");

    let metrics = Metrics::new().context("failed to register metrics")?;
    let live = LiveSchema::new();
    let converter = Arc::new(SchemaConverter::new(
        Arc::new(HttpQueryExecutor::new()),
        Arc::new(ActiveDirectoryTokenProvider::new()),
    ));
    let connector = GrpcRegistryConnector::new(&config.registry_url)
        .map_err(|e| anyhow::anyhow!("invalid registry url `{}`: {e}", config.registry_url))?;

    let cancel = CancellationToken::new();
    let (schemas_tx, schemas_rx) = mpsc::channel(8);
    let (errors_tx, errors_rx) = mpsc::channel(32);

    let subscription = RegistrySubscription::new(Arc::new(connector), converter)
        .with_retry(config.retry)
        .spawn(schemas_tx, errors_tx, config.reconnect_delay, cancel.clone());
    tokio::spawn(live_schema::consume_schemas(
        live.clone(),
        schemas_rx,
        Some(metrics.clone()),
    ));

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("shutdown requested");
                    cancel.cancel();
                }
                Err(e) => tracing::warn!(error = %e, "failed to listen for ctrl-c"),
            }
        }
    });

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    let gateway = Gateway::new(live.clone(), metrics.clone());

    let outcome = tokio::select! {
        served = server::serve(listener, gateway, cancel.clone()) => served.context("server failed"),
        Some(failures) = schema_registry::consume_errors(
            errors_rx,
            live,
            Some(metrics),
            config.max_startup_failures,
        ) => Err(anyhow::anyhow!(
            "registry unavailable: {failures} errors before the first schema was served"
        )),
    };

    cancel.cancel();
    if let Err(e) = subscription.await {
        tracing::warn!(error = %e, "registry subscription task failed");
    }
    outcome
}
