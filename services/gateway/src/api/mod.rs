//! HTTP API handlers and routing.

pub mod error;
mod health;
mod jobs;

use axum::{
    http::{header, HeaderName, Method},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::gateway::Gateway;
use crate::proxy::API_KEY_HEADER;

pub use jobs::REQUEST_ID_HEADER;

/// Create the gateway router with all routes and middleware.
pub fn create_router(gateway: Gateway) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    // Browser clients submit renders directly.
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(API_KEY_HEADER)])
        .allow_origin(Any);

    Router::new()
        .merge(health::routes())
        .merge(jobs::routes())
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .layer(cors)
        .with_state(gateway)
}
