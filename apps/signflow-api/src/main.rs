//! Signflow API Server - signature workflow engine for the Parley platform
//!
//! Provides REST endpoints for:
//! - Public signer surface: verify token, sign, decline (rate limited)
//! - Management surface: create/get/list requests, remind, cancel

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use signflow_api::handlers;
use signflow_api::notify::{LogEmailSender, Notifier, DEFAULT_BASE_URL};
use signflow_api::AppState;

/// Command-line arguments for the signflow API server
#[derive(Parser, Debug)]
#[command(name = "signflow-api")]
#[command(about = "Signature workflow API for the Parley proposal platform")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Host address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Rate limit for the public signer surface: requests per second per IP
    #[arg(long, default_value = "10")]
    rate_limit: u32,

    /// SQLite database URL (overrides DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Base URL embedded in signing links (overrides PUBLIC_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("signflow_api=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    info!("Initializing signflow API...");
    let base_url = args
        .base_url
        .or_else(|| std::env::var("PUBLIC_BASE_URL").ok())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let notifier = Notifier::spawn(Arc::new(LogEmailSender), base_url);
    let state = Arc::new(AppState::new(args.database_url, notifier).await?);

    // Rate limiter for the unauthenticated signer surface
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(args.rate_limit.into())
            .burst_size(args.rate_limit * 2)
            .finish()
            .context("invalid rate limiter configuration")?,
    );

    // CORS configuration for web clients
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(handlers::public_routes().layer(GovernorLayer {
            config: governor_conf,
        }))
        .merge(handlers::management_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("signflow API listening on http://{}", addr);
    info!(
        "Public signer surface rate limit: {} requests/second per IP",
        args.rate_limit
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
