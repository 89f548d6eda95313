use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use antidote_agent::cli::Args;
use antidote_agent::config::AgentConfig;
use antidote_agent::connection::{ConnectionManager, AGENT_VERSION};
use antidote_agent::discovery::{AppCatalog, HostDiscovery};
use antidote_agent::executor::Executor;
use antidote_agent::health;
use antidote_agent::logmonitor::Monitor;
use antidote_agent::policy::Validator;
use antidote_agent::router::Router;
use antidote_agent::signing::Verifier;
use antidote_agent::sink::{outbound_channel, OUTBOUND_QUEUE_CAPACITY};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    let cfg = Arc::new(AgentConfig::resolve(&args)?);
    tracing::info!(
        version = AGENT_VERSION,
        endpoint = %cfg.endpoint,
        "starting antidote-agent"
    );

    let verifier =
        Verifier::new(cfg.signing_key.as_deref()).context("invalid ANTIDOTE_SIGNING_KEY")?;
    if verifier.is_enabled() {
        tracing::info!("command signature verification enabled");
    } else {
        tracing::warn!("command signature verification disabled (no public key configured)");
    }

    let shutdown = CancellationToken::new();
    let (sink, outbound_rx) = outbound_channel(OUTBOUND_QUEUE_CAPACITY);

    let validator = Arc::new(Validator::new());
    let executor = Arc::new(Executor::new(
        sink.clone(),
        Arc::clone(&validator),
        shutdown.clone(),
    ));
    let monitor = Arc::new(Monitor::new(sink.clone(), shutdown.child_token()));
    monitor.start();
    let catalog: Arc<dyn AppCatalog> = Arc::new(HostDiscovery::new());

    let router = Arc::new(Router::new(
        verifier,
        executor,
        validator,
        Arc::clone(&monitor),
        catalog,
        sink.clone(),
    ));

    let manager = ConnectionManager::new(Arc::clone(&cfg), router, outbound_rx, shutdown.clone());
    let connection_task = tokio::spawn(manager.run());
    let health_task = health::spawn_sampler(sink, shutdown.child_token());

    wait_for_shutdown_signal().await;
    tracing::info!("shutting down");

    shutdown.cancel();
    monitor.stop().await;
    let _ = connection_task.await;
    let _ = health_task.await;

    tracing::info!("shutdown complete");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(error = %err, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
