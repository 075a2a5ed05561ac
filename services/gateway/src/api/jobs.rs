//! Render and shutdown endpoints.

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Response, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tracing::warn;

use crate::api::error::ApiError;
use crate::gateway::Gateway;
use crate::job::RenderJob;
use crate::proxy::API_KEY_HEADER;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ShutdownResponse {
    pub status: String,
    pub requested_workers: u32,
}

pub fn routes() -> Router<Gateway> {
    Router::new()
        .route("/render", post(render))
        .route("/shutdown", post(shutdown))
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Accept a render job and stream the worker's artifact back.
async fn render(
    State(gateway): State<Gateway>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response<Body>, ApiError> {
    let request_id = request_id(&headers);

    let job = RenderJob::from_body(body)
        .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;
    let credential = headers.get(API_KEY_HEADER).cloned();

    gateway
        .render(job, credential)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id))
}

/// Scale the fleet to zero. Called by an idle worker with the shared secret.
async fn shutdown(
    State(gateway): State<Gateway>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = request_id(&headers);
    let credential = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());

    if let Err(e) = gateway.shutdown(credential).await {
        let forwarded_for = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");
        warn!(request_id = %request_id, forwarded_for, error = %e, "Shutdown request refused");
        return Err(ApiError::from(e).with_request_id(request_id));
    }

    Ok((
        StatusCode::OK,
        Json(ShutdownResponse {
            status: "scaling_to_zero".to_string(),
            requested_workers: 0,
        }),
    ))
}
