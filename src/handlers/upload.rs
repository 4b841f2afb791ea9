//! Upload session handlers.

use axum::{
    body::Body,
    http::{header, HeaderMap, Response, StatusCode},
};
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ErrorCode, StreamError, StreamResult};
use crate::models::ContentRange;
use crate::store::{MemoryObjectStore, RemoteObjectStore};

use super::{build_response, common_headers, json_response};

/// POST /items/{id}/upload-session - Open an upload session.
///
/// The returned session carries an absolute `upload_url` built from the
/// request's Host header, falling back to `base_url`.
pub async fn create_upload_session(
    store: Arc<MemoryObjectStore>,
    id: &str,
    headers: &HeaderMap,
    base_url: &str,
) -> StreamResult<Response<Body>> {
    let mut session = store.open_upload_session(id).await?;

    let base = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(|host| format!("http://{}", host))
        .unwrap_or_else(|| base_url.to_string());
    session.upload_url = Some(format!("{}/upload/{}", base.trim_end_matches('/'), session.id));

    json_response(StatusCode::OK, &session)
}

/// PUT /upload/{session_id} - Upload one byte range.
///
/// Requires `Content-Range: bytes S-E/T` matching the body length.
pub async fn put_range(
    store: Arc<MemoryObjectStore>,
    session_id: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> StreamResult<Response<Body>> {
    let session = store.session(session_id).ok_or_else(|| {
        StreamError::with_message(
            ErrorCode::SessionNotFound,
            format!("Upload session {} does not exist or has expired", session_id),
        )
    })?;

    let value = headers
        .get(header::CONTENT_RANGE)
        .ok_or_else(|| StreamError::invalid_argument("The Content-Range header is required"))?;
    let range = value
        .to_str()
        .ok()
        .and_then(ContentRange::parse)
        .ok_or_else(|| {
            StreamError::with_message(
                ErrorCode::InvalidRange,
                format!("Malformed Content-Range header {:?}", value),
            )
        })?;

    debug!("Upload {} into session {}", range, session_id);
    store.put_range(&session, range, body).await?;

    let mut response = build_response(StatusCode::ACCEPTED, common_headers(), Body::empty());
    if let Ok(value) = range.to_header().parse() {
        response.headers_mut().insert(header::CONTENT_RANGE, value);
    }
    Ok(response)
}
