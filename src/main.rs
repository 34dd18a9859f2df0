//! # Snowboy Wake Server
//!
//! Streaming wake word detection over WebSocket. Clients pick a keyword,
//! stream PCM audio and receive `detection` / `not-detected` events.
//!
//! ## Application Architecture:
//! - **config / cli**: layered configuration (defaults, TOML, `WAKE_*` env, flags)
//! - **wake**: keyword discovery, per-keyword settings, detector backends
//! - **audio**: format conversion, windowing and the per-connection session
//! - **websocket**: the `/ws` event transport, one actor per connection
//! - **health / handlers**: HTTP endpoints for monitoring and inspection
//! - **middleware**: request telemetry
//! - **error**: wake pipeline errors and HTTP error responses

mod audio;
mod cli;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod state;
mod wake;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use clap::Parser;
use cli::Cli;
use config::AppConfig;
use state::AppState;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.debug)?;

    let config = AppConfig::load(&cli)?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!(
        backend = %config.detection.backend,
        default_keyword = %config.keywords.default_keyword,
        "Configuration loaded: {}:{}",
        config.server.host,
        config.server.port
    );

    let app_state = AppState::new(config.clone())?;

    let keywords = app_state.registry.discover();
    if keywords.is_empty() {
        warn!(dirs = ?app_state.registry.search_dirs(), "No keyword models found");
    } else {
        info!(
            count = keywords.len(),
            keywords = ?keywords.keys().collect::<Vec<_>>(),
            "Keyword models discovered"
        );
    }
    if !keywords.contains_key(&config.keywords.default_keyword) {
        warn!(
            keyword = %config.keywords.default_keyword,
            "Default keyword is not installed; audio without a detect event will be rejected"
        );
    }

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::RequestTelemetry)
            .wrap(TracingLogger::default())
            .route("/ws", web::get().to(websocket::wake_websocket))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/keywords", web::get().to(handlers::list_keywords))
                    .route("/keywords/{name}", web::get().to(handlers::get_keyword)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` wins; otherwise INFO for this crate and actix, DEBUG with `--debug`.
fn init_tracing(debug: bool) -> Result<()> {
    let default_filter = if debug {
        "snowboy_wake_server=debug,actix_web=info"
    } else {
        "snowboy_wake_server=info,actix_web=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for SIGINT: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received SIGINT");
}
