//! polish-optimizer - Optimization Session Manager
//!
//! Accepts academic-text optimization jobs, splits them into segments,
//! executes the segments against model providers with bounded concurrency
//! and streams progress to clients over SSE.

use anyhow::{bail, Context, Result};
use clap::Parser;
use polish_common::api::CardKeySet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use polish_optimizer::config::OptimizerConfig;
use polish_optimizer::provider::{ChatCompletionsProvider, ModelProvider, ProviderPool};
use polish_optimizer::services::{OptimizationManager, SessionRegistry};
use polish_optimizer::AppState;

/// Command-line arguments for polish-optimizer
#[derive(Parser, Debug)]
#[command(name = "polish-optimizer")]
#[command(about = "Optimization Session Manager for academic text polishing")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "POLISH_PORT")]
    port: Option<u16>,

    /// Root folder holding the session database
    #[arg(short, long, env = "POLISH_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// TOML config file
    #[arg(short, long, env = "POLISH_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config =
        OptimizerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.directives("polish_optimizer").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting polish-optimizer {} ({}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    if config.providers.is_empty() {
        bail!("No model providers configured; add at least one [[providers]] table");
    }

    let card_keys = CardKeySet::from_entries(config.resolve_card_keys());

    // Session registry
    let registry = if config.database.in_memory {
        info!("Database: disabled (in-memory sessions)");
        SessionRegistry::in_memory()
    } else {
        // Root folder only matters for the database file
        let root_folder = polish_common::config::resolve_root_folder(
            args.root_folder.as_deref(),
            "POLISH_ROOT_FOLDER",
            config.root_folder.as_deref(),
        );
        let db_path = root_folder.join(&config.database.file_name);
        info!("Database: {}", db_path.display());

        let pool = polish_optimizer::db::init_database_pool(&db_path)
            .await
            .context("Failed to open session database")?;
        SessionRegistry::with_database(pool)
    };
    let registry = Arc::new(registry);
    registry
        .restore()
        .await
        .context("Failed to restore sessions")?;

    // Providers
    let mut providers: Vec<Arc<dyn ModelProvider>> = Vec::with_capacity(config.providers.len());
    for provider_config in &config.providers {
        let provider = ChatCompletionsProvider::from_config(provider_config)
            .with_context(|| format!("Failed to create provider {}", provider_config.name))?;
        info!(
            provider = %provider_config.name,
            model = %provider_config.model,
            timeout_secs = provider_config.timeout_secs,
            "Model provider configured"
        );
        providers.push(Arc::new(provider));
    }
    let providers = Arc::new(ProviderPool::new(providers).with_probe_limits(
        std::time::Duration::from_secs(config.health.probe_timeout_secs),
        std::time::Duration::from_millis(config.health.degraded_latency_ms),
    ));

    let config = Arc::new(config);
    let manager = Arc::new(OptimizationManager::new(
        &config,
        Arc::clone(&registry),
        Arc::clone(&providers),
    ));

    // Background tasks
    let shutdown = CancellationToken::new();
    let dispatch = tokio::spawn(Arc::clone(&manager).run_dispatch_loop(shutdown.clone()));
    let probes = Arc::clone(&providers).spawn_refresh(config.probe_interval(), shutdown.clone());

    let port = args.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", config.server.host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.server.host, port))?;

    let state = AppState::new(manager, card_keys, Arc::clone(&config));
    let app = polish_optimizer::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    shutdown.cancel();
    let _ = probes.await;
    let _ = dispatch.await;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
