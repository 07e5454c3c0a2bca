use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
};

use crate::delivery::Delivery;
use crate::error::{Result, RelayError};
use crate::request::DownloadRequest;

use super::AppState;

const INDEX_HTML: &str = include_str!("../../assets/index.html");

/// Browser form
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Download relay endpoint.
///
/// The body is read raw so that malformed JSON and a bad `url` both come
/// back as plain-text 400s.
pub async fn download(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    let request = DownloadRequest::from_slice(&body)?;
    let delivery = state.relay.fetch(&request).await?;
    stream_delivery(delivery).await
}

/// Stream a delivery back; the file is removed when the body is dropped
async fn stream_delivery(delivery: Delivery) -> Result<Response> {
    let content_type = delivery.content_type();
    let disposition = delivery.content_disposition();
    let (len, stream) = delivery.open().await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_DISPOSITION, disposition)
        .header(header::CACHE_CONTROL, "no-store")
        .header(header::CONTENT_LENGTH, len)
        .body(Body::from_stream(stream))
        .map_err(|e| RelayError::Internal(format!("Failed to build response: {}", e)))
}
