use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use portfolio_gateway::config::{Args, credential_slots_from_env};
use portfolio_gateway::handlers::fetch::{ProxySettings, build_proxy_client};
use portfolio_gateway::rate_limit::{RateLimiter, purge_expired_entries};
use portfolio_gateway::rotation::KeyRotator;
use portfolio_gateway::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional; real deployments set the environment directly
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "portfolio_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // parse cli arguments
    let args = Args::parse();

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .read_timeout(args.upstream_timeout())
        .build()
        .context("failed to build HTTP client")?;

    let proxy = ProxySettings::default();
    let proxy_client = build_proxy_client(
        &proxy,
        reqwest::Client::builder().connect_timeout(Duration::from_secs(10)),
    )
    .context("failed to build proxy HTTP client")?;

    let state = Arc::new(AppState::new(
        client,
        proxy_client,
        RateLimiter::new(args.rate_limit, args.rate_window()),
        KeyRotator::new(credential_slots_from_env()),
        args.gateway_settings(),
        proxy,
    ));

    // spawn the rate limit sweeper
    tokio::spawn(purge_expired_entries(Arc::clone(&state.rate_limiter)));

    let app = portfolio_gateway::router(state);

    let addr = SocketAddr::new(args.host, args.port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(%addr, "Gateway listening");
    tracing::info!(upstream = %args.upstream_url, model = %args.model, "Forwarding chat requests");
    tracing::info!(
        limit = args.rate_limit,
        window_secs = args.rate_window,
        "Rate limit configured"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
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
