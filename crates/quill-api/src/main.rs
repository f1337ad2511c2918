use clap::Parser;
use quill_api::{routes, AppState};
use quill_config::AppConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "quill-api")]
#[command(about = "Quill collaborative note service")]
struct Args {
    /// Override the request/response listen address
    #[arg(long)]
    http_bind: Option<String>,

    /// Override the streaming listen address
    #[arg(long)]
    stream_bind: Option<String>,

    /// Override the RPC listen address
    #[arg(long)]
    rpc_bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = AppConfig::from_env()?;
    if let Some(bind) = args.http_bind {
        config.http_listen = bind;
    }
    if let Some(bind) = args.stream_bind {
        config.stream_listen = bind;
    }
    if let Some(bind) = args.rpc_bind {
        config.rpc_listen = bind;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        http_listen = %config.http_listen,
        stream_listen = %config.stream_listen,
        rpc_listen = %config.rpc_listen,
        redis_url = %config.redis_url,
        snapshot_dir = %config.snapshot_dir.display(),
        embedding_dim = config.embedding_dim,
        "starting quill-api"
    );

    let state = AppState::production(config.clone()).await?;

    let http = tokio::net::TcpListener::bind(&config.http_listen).await?;
    let stream = tokio::net::TcpListener::bind(&config.stream_listen).await?;
    let rpc = tokio::net::TcpListener::bind(&config.rpc_listen).await?;

    tracing::info!("listeners bound, serving");

    tokio::try_join!(
        axum::serve(http, routes::rest_router(state.clone()))
            .with_graceful_shutdown(shutdown_signal()),
        axum::serve(stream, routes::stream_router(state.clone()))
            .with_graceful_shutdown(shutdown_signal()),
        axum::serve(rpc, routes::rpc_router(state)).with_graceful_shutdown(shutdown_signal()),
    )?;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
