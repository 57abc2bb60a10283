//! kvscope HTTP API server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum::Router;
use clap::Parser;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use kvscope::server::{AppState, Config, CorsConfig, init_logging, router};

/// kvscope HTTP API server.
#[derive(Parser, Debug)]
#[command(name = "kvscope-server")]
#[command(about = "HTTP API for browsing embedded key-value stores")]
struct Args {
    /// Path to the configuration file (defaults apply when absent).
    #[arg(short, long, env = "KVSCOPE_CONFIG")]
    config: Option<PathBuf>,

    /// Connection registry file, overriding `registry.path`.
    #[arg(long, env = "KVSCOPE_REGISTRY")]
    registry: Option<PathBuf>,

    /// Port to listen on, overriding `server.port`.
    #[arg(short, long)]
    port: Option<u16>,
}

/// Build CORS layer from configuration.
fn build_cors_layer(config: &CorsConfig) -> CorsLayer {
    if !config.enabled {
        // Deny all cross-origin requests by default
        return CorsLayer::new();
    }

    let mut cors = CorsLayer::new();

    if config.allow_origins.iter().any(|o| o == "*") {
        cors = cors.allow_origin(Any);
    } else {
        let origins: Vec<_> = config
            .allow_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors = cors.allow_origin(origins);
    }

    let methods: Vec<_> = config
        .allow_methods
        .iter()
        .filter_map(|m| m.parse().ok())
        .collect();
    let headers: Vec<_> = config
        .allow_headers
        .iter()
        .filter_map(|h| h.parse().ok())
        .collect();

    cors.allow_methods(methods)
        .allow_headers(headers)
        .max_age(Duration::from_secs(config.max_age))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration first (needed for logging setup)
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(registry) = args.registry {
        config.registry.path = registry;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.apply_env();

    init_logging(&config.logging)?;

    tracing::info!(
        registry = %config.registry.path.display(),
        keyspace = %config.store.keyspace,
        "loading connections"
    );
    let state = AppState::from_config(&config)?;
    for (name, location) in state.session().connection_locations() {
        tracing::info!("  {} -> {}", name, location);
    }

    let cors = build_cors_layer(&config.cors);
    if config.cors.enabled {
        tracing::info!(
            "CORS enabled with {} allowed origin(s)",
            config.cors.allow_origins.len()
        );
    }

    let session = state.session().clone();
    let app: Router = router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.bind_addr().parse()?;
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    session.shutdown().await;
    tracing::info!("Server shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
