//! HTTP control surface over a [`SessionManager`].

pub mod config;
pub mod routes;

use axum::{routing::get, Router};
use msgbridge_core::SessionManager;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub manager: SessionManager,
    /// Send through [`SessionManager::send_when_ready`] instead of failing
    /// fast when the account is not connected.
    pub connect_on_send: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/:account", get(routes::session_status))
        .route("/:account/close", get(routes::close_session))
        .route("/:account/:destination/message", get(routes::send_message))
        .route("/:account/:destination/mensagem", get(routes::send_message))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
