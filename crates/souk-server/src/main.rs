use souk_gateway::heartbeat::HeartbeatMonitor;
use souk_server::{ServerConfig, build_dispatcher, build_router, open_store};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "souk=debug,souk_server=debug,souk_gateway=debug,souk_api=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let store = open_store(&config.db_path)?;
    let dispatcher = build_dispatcher(&config, store);

    let cancel = CancellationToken::new();
    let heartbeat = HeartbeatMonitor::new(dispatcher.clone()).spawn(cancel.clone());

    let addr = config.addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Souk server listening on {}", addr);

    let shutdown = cancel.clone();
    axum::serve(listener, build_router(dispatcher))
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("shutting down"),
                () = shutdown.cancelled() => {}
            }
        })
        .await?;

    cancel.cancel();
    heartbeat.await?;
    Ok(())
}
