//! HTTP surface: storefront pages, JSON endpoints, the admin API and the
//! notification WebSocket.

use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tracing::info;

use crate::config::Config;
use crate::services::Marketplace;

pub mod account;
pub mod admin;
pub mod api;
pub mod chat;
pub mod error;
pub mod forms;
pub mod layers;
pub mod session;
pub mod shop;
pub mod storefront;
pub mod templates;
pub mod ws;

pub use error::{ApiError, ApiResult, PageError, PageResult};
pub use session::{AdminUser, CurrentUser, MaybeUser};

#[derive(Clone)]
pub struct AppState {
    pub market: Arc<Marketplace>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(market: Marketplace, config: Config) -> Self {
        Self { market: Arc::new(market), config: Arc::new(config) }
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "student-bazaar",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub fn app_router(state: AppState) -> Router {
    let static_dir = state.config.server.static_dir.clone();
    let upload_dir = state.market.uploads.root().to_path_buf();
    let server = state.config.server.clone();

    let router = Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .merge(storefront::routes())
        .merge(shop::routes())
        .merge(chat::routes())
        .nest("/account", account::routes())
        .nest("/api", api::routes())
        .nest("/admin", admin::routes())
        .nest_service("/static", ServeDir::new(static_dir))
        .nest_service("/images", ServeDir::new(upload_dir))
        .with_state(state);

    layers::apply_standard_layers(router, &server)
}

/// Serves until ctrl-c.
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "StudentBazaar listening (visit http://{})", addr);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl-c");
        return;
    }
    info!("Shutdown signal received");
}
