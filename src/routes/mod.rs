use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, create_security_headers_layer, Config};
use crate::dispatch::{self, Dispatcher};

/// Mounts the contract-driven dispatcher and the cross-cutting middleware.
pub fn create_routes(dispatcher: Arc<Dispatcher>, config: &Config) -> Router {
    dispatch::router(dispatcher)
        .layer(create_security_headers_layer(config))
        .layer(create_cors_layer())
        .layer(TraceLayer::new_for_http())
}
