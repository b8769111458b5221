//! codeframe-engine binary
//!
//! Serves the codeframe generation API over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use codeframe_common::config::{database_path, load_config, resolve_root_folder};
use codeframe_common::events::EventBus;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use codeframe_engine::config::EngineConfig;
use codeframe_engine::services::GenerationOrchestrator;
use codeframe_engine::{build_router, db, AppState};

const DEFAULT_PORT: u16 = 5800;
const EVENT_BUS_CAPACITY: usize = 1000;

#[derive(Parser, Debug)]
#[command(name = "codeframe-engine")]
#[command(about = "Codeframe generation and hierarchy synthesis service")]
#[command(version)]
struct Args {
    /// Port to listen on (TOML `port`, then 5800, when unset)
    #[arg(short, long, env = "CODEFRAME_PORT")]
    port: Option<u16>,

    /// Root folder holding codeframe.db
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Config file (default: ~/.config/codeframe/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = load_config(args.config.as_deref()).context("Failed to load config file")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| toml_config.logging.filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let root_folder = resolve_root_folder(
        args.root_folder.as_deref(),
        "CODEFRAME_ROOT_FOLDER",
        &toml_config,
    );
    let port = args.port.or(toml_config.port).unwrap_or(DEFAULT_PORT);

    info!("Starting codeframe-engine on port {}", port);
    info!("Root folder: {}", root_folder.display());

    let db_pool = db::init_database_pool(&database_path(&root_folder))
        .await
        .context("Failed to initialize database")?;
    info!("Database initialized");

    let engine_config = EngineConfig::resolve(&toml_config);
    let collaborators = engine_config
        .build_collaborators()
        .context("Failed to build collaborator clients")?;

    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
    let orchestrator = Arc::new(GenerationOrchestrator::new(
        db_pool,
        event_bus.clone(),
        collaborators,
        engine_config.orchestrator,
    ));

    let state = AppState::new(event_bus, Arc::clone(&orchestrator));

    match orchestrator.resume_pending().await {
        Ok(0) => {}
        Ok(n) => info!("Resumed {} interrupted generation(s)", n),
        Err(e) => {
            warn!("Failed to resume interrupted generations: {}", e);
            state.record_error(format!("Resume failed: {}", e)).await;
        }
    }

    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
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
