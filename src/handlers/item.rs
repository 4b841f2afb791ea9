//! Item handlers: root, metadata, content, children, delete, copy and move.

use axum::{
    body::Body,
    http::{HeaderValue, Response, StatusCode},
};
use std::sync::Arc;

use crate::error::StreamResult;
use crate::models::{CopyItemRequest, CreateItemRequest};
use crate::store::{MemoryObjectStore, RemoteObjectStore};

use super::{add_item_headers, build_response, common_headers, json_response};

/// GET /items/{id} - Get item metadata.
pub async fn get_item(store: Arc<MemoryObjectStore>, id: &str) -> StreamResult<Response<Body>> {
    let item = store.get_item(id).await?;
    let mut response = json_response(StatusCode::OK, &item)?;
    add_item_headers(response.headers_mut(), &item.etag, &item.last_modified);
    Ok(response)
}

/// GET /root - Get the root folder.
pub async fn get_root(store: Arc<MemoryObjectStore>) -> StreamResult<Response<Body>> {
    let root = store.get_root().await?;
    json_response(StatusCode::OK, &root)
}

/// GET /items/{id}/content - Download file content.
pub async fn get_content(store: Arc<MemoryObjectStore>, id: &str) -> StreamResult<Response<Body>> {
    let item = store.get_item(id).await?;
    let content = store.read_content(id).await?;

    let mut headers = common_headers();
    headers.insert(
        "Content-Type",
        HeaderValue::from_static("application/octet-stream"),
    );
    add_item_headers(&mut headers, &item.etag, &item.last_modified);

    Ok(build_response(StatusCode::OK, headers, Body::from(content)))
}

/// GET /items/{id}/children - List folder children.
pub async fn list_children(store: Arc<MemoryObjectStore>, id: &str) -> StreamResult<Response<Body>> {
    let children = store.list_children(id).await?;
    json_response(StatusCode::OK, &children)
}

/// POST /items/{id}/children - Create an empty file or folder.
pub async fn create_child(
    store: Arc<MemoryObjectStore>,
    parent_id: &str,
    request: CreateItemRequest,
) -> StreamResult<Response<Body>> {
    let item = store
        .create_item(parent_id, &request.name, request.kind, request.overwrite)
        .await?;
    json_response(StatusCode::CREATED, &item)
}

/// DELETE /items/{id} - Delete an item and everything below it.
pub async fn delete_item(store: Arc<MemoryObjectStore>, id: &str) -> StreamResult<Response<Body>> {
    store.delete_item(id).await?;
    Ok(build_response(StatusCode::NO_CONTENT, common_headers(), Body::empty()))
}

/// POST /items/{id}/copy - Copy an item into another folder.
pub async fn copy_item(
    store: Arc<MemoryObjectStore>,
    id: &str,
    request: CopyItemRequest,
) -> StreamResult<Response<Body>> {
    let copy = store
        .copy_item(id, &request.parent_id, request.name.as_deref(), request.overwrite)
        .await?;
    json_response(StatusCode::CREATED, &copy)
}

/// POST /items/{id}/move - Move an item into another folder.
pub async fn move_item(
    store: Arc<MemoryObjectStore>,
    id: &str,
    request: CopyItemRequest,
) -> StreamResult<Response<Body>> {
    let moved = store
        .move_item(id, &request.parent_id, request.name.as_deref(), request.overwrite)
        .await?;
    json_response(StatusCode::OK, &moved)
}
