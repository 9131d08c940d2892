use axum::{routing::get, Router};
use mia_core::config::ProxyConfig;
use mia_core::{MiaError, Result};
use std::sync::Arc;

use crate::routes::RouteTable;

/// Shared state, passed as Arc<ProxyState> to every handler.
pub struct ProxyState {
    pub config: ProxyConfig,
    pub routes: RouteTable,
    /// Upstream client. Redirects are returned to the caller, not followed.
    pub client: reqwest::Client,
}

impl ProxyState {
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let routes = RouteTable::from_config(&config)?;
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| MiaError::Internal(format!("failed to build upstream client: {e}")))?;
        Ok(Self {
            config,
            routes,
            client,
        })
    }
}

/// Assemble the proxy router: `/health` plus a catch-all forwarder.
pub fn build_router(state: Arc<ProxyState>) -> Router {
    let allow_cors = state.config.allow_cors;
    let router = Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .fallback(crate::http::forward::forward_handler)
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    if allow_cors {
        router.layer(tower_http::cors::CorsLayer::permissive())
    } else {
        router
    }
}
