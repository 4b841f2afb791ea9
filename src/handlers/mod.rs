//! Request handlers for the upload-session emulator.

mod item;
mod upload;

pub use item::*;
pub use upload::*;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Response, StatusCode};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ErrorCode, StreamError, StreamResult};

/// Formats a timestamp as an HTTP date.
pub fn format_http_date(dt: &DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Creates the headers every emulator response carries.
pub fn common_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(id) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
        headers.insert("x-request-id", id);
    }
    if let Ok(date) = HeaderValue::from_str(&format_http_date(&Utc::now())) {
        headers.insert("Date", date);
    }
    headers.insert(
        "server",
        HeaderValue::from_static(concat!("seekstream-rs/", env!("CARGO_PKG_VERSION"))),
    );
    headers
}

/// Adds ETag and Last-Modified headers.
pub fn add_item_headers(headers: &mut HeaderMap, etag: &str, last_modified: &DateTime<Utc>) {
    if let Ok(etag) = HeaderValue::from_str(etag) {
        headers.insert("ETag", etag);
    }
    if let Ok(date) = HeaderValue::from_str(&format_http_date(last_modified)) {
        headers.insert("Last-Modified", date);
    }
}

/// Builds a response with the given status, headers, and body.
pub fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Builds a JSON response with the common headers.
pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> StreamResult<Response<Body>> {
    let body = serde_json::to_vec(value).map_err(|e| {
        StreamError::with_message(ErrorCode::InternalError, format!("Failed to encode response: {}", e))
    })?;
    let mut headers = common_headers();
    headers.insert("Content-Type", HeaderValue::from_static("application/json"));
    Ok(build_response(status, headers, Body::from(body)))
}
