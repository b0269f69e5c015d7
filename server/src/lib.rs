#![warn(clippy::nursery, clippy::pedantic)]

//! Expiring paste store and the HTTP API in front of it.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use burnbin_common::API_ENDPOINT;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod error;
pub mod handlers;
pub mod paste;
pub mod password;
pub mod rate_limit;
pub mod service;
pub mod short_code;
pub mod store;
pub mod sweeper;
mod time;

pub use config::Config;
pub use error::PasteError;
pub use service::PasteService;
pub use store::{Store, StoreError};

use crate::rate_limit::CreateLimiter;

/// Shared state passed to HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub service: PasteService,
    pub limiter: CreateLimiter,
}

impl AppState {
    pub fn new(config: Config, store: Store) -> Self {
        Self {
            service: PasteService::new(store.clone(), config.max_content_chars),
            limiter: CreateLimiter::new(store, config.daily_create_limit),
            config: Arc::new(config),
        }
    }
}

/// Builds the router with every API route under [`API_ENDPOINT`].
pub fn create_app(state: AppState) -> Router {
    let body_limit = state.config.max_body_bytes;

    let api = Router::new()
        .route("/paste", post(handlers::create))
        .route("/p/:slug", get(handlers::read).delete(handlers::delete))
        .route("/p/:slug/report", post(handlers::report))
        .route("/p/:slug/delete", post(handlers::delete));

    Router::new()
        .nest(API_ENDPOINT, api)
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}
