mod cli;
mod config;
mod error;
mod models;
mod routes;
mod services;

use axum::{routing::get, Router};
use clap::Parser;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{CliArgs, Command};
use crate::config::Config;
use crate::models::{RunState, RunSummary};
use crate::services::{
    orchestrator::Orchestrator,
    scheduler::{start_schedule, ScheduleConfig},
};

/// Application state shared across handlers
pub struct AppState {
    pub config: Config,
    pub orchestrator: Arc<Orchestrator>,
    pub start_time: Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = CliArgs::parse();

    // Initialize tracing/logging
    let default_filter = if args.verbose {
        "iptv_aggregator=debug,tower_http=debug"
    } else {
        "iptv_aggregator=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Load configuration
    let mut config = Config::from_env();

    tracing::info!("Starting IPTV Aggregator v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Run(paths) => {
            paths.apply(&mut config);
            let orchestrator = Orchestrator::from_config(&config).await?;
            let summary = orchestrator.run().await;

            if summary.state == RunState::Failed {
                tracing::error!(
                    "Run {} failed: {}",
                    summary.run_id,
                    summary.error.as_deref().unwrap_or("unknown error")
                );
            } else {
                tracing::info!(
                    "Run {} done: {} entries published in {} tiers",
                    summary.run_id,
                    summary.published(),
                    summary.tiers.len()
                );
            }
            Ok(exit_code(&summary))
        }
        Command::Serve {
            paths,
            port,
            interval,
        } => {
            paths.apply(&mut config);
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(interval) = interval {
                config.schedule_interval_secs = interval;
            }
            serve(config).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Non-zero only when the run failed
fn exit_code(summary: &RunSummary) -> ExitCode {
    match summary.state {
        RunState::Failed => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let port = config.port;

    let orchestrator = Arc::new(Orchestrator::from_config(&config).await?);
    tracing::info!(
        "Pipeline initialized (publishing to {})",
        orchestrator.publish_dir().display()
    );

    // Start the pipeline schedule (runs in background)
    tokio::spawn(start_schedule(
        orchestrator.clone(),
        ScheduleConfig {
            interval_secs: config.schedule_interval_secs,
        },
    ));

    // Build application state
    let state = Arc::new(AppState {
        config,
        orchestrator,
        start_time: Instant::now(),
    });

    let app = build_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints
        .route("/", get(routes::health::root))
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::health::metrics))
        .route("/ready", get(routes::health::ready))
        .route("/live", get(routes::health::live))
        // Run status
        .route("/api/runs/latest", get(routes::runs::latest_run))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
