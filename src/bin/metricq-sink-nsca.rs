//! Binary entry point: wires the CLI, logging, the (dev-only) stdin metric
//! source, and the reconciler together.
//!
//! Production deployments replace [`StdinMetricSource`] with a real MetricQ
//! AMQP transport adapter; the core crate never depends on a concrete one.

use clap::Parser;
use metricq_sink_nsca::cli::{build_env_filter, Cli};
use metricq_sink_nsca::config::BridgeConfig;
use metricq_sink_nsca::reconciler::Reconciler;
use metricq_sink_nsca::source::{chunk_channel, MetricSource, StdinMetricSource};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(build_env_filter(&cli.verbose)?)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        dry_run = cli.dry_run,
        metricq_server = %cli.metricq_server,
        token = %cli.token,
        "starting metricq-sink-nsca"
    );

    let reconciler = Reconciler::new(cli.dry_run);

    if let Some(path) = &cli.config {
        let text = tokio::fs::read_to_string(path).await?;
        let config: BridgeConfig = serde_json::from_str(&text)?;
        if let Err(e) = reconciler.configure(config).await {
            error!(error = %e, "initial configuration was rejected; continuing with no checks");
        }
    } else {
        warn!("no --config given; the sink will run with no checks configured");
    }

    let cancel = CancellationToken::new();

    let batch_sender = tokio::spawn({
        let reconciler = reconciler.clone();
        let cancel = cancel.clone();
        async move {
            reconciler.run_batch_sender(cancel).await;
        }
    });

    let (handle, mut chunks) = chunk_channel();
    let source: Box<dyn MetricSource> = Box::new(StdinMetricSource);
    let source_task = tokio::spawn(async move {
        source.run(handle).await;
    });

    let dispatch_task = tokio::spawn({
        let reconciler = reconciler.clone();
        async move {
            while let Some(chunk) = chunks.recv().await {
                reconciler.on_chunk(chunk).await;
            }
        }
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping");

    cancel.cancel();
    source_task.abort();
    dispatch_task.abort();
    let _ = batch_sender.await;

    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
