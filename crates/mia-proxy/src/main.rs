use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

mod app;
mod http;
mod routes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mia_proxy=info,tower_http=debug".into()),
        )
        .init();

    // load config: MIA_CONFIG env > ~/.mia/mia.toml
    let config_path = std::env::var("MIA_CONFIG").ok();
    let config = mia_core::MiaConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        mia_core::MiaConfig::default()
    });

    let addr: SocketAddr = format!("{}:{}", config.proxy.bind, config.proxy.port).parse()?;
    let state = Arc::new(app::ProxyState::new(config.proxy)?);
    for route in state.routes.iter() {
        info!(mount = %route.mount(), target = %route.origin(), "proxy route");
    }
    let router = app::build_router(state);

    info!("mia proxy listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
