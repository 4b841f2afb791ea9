//! Request routing for the upload-session emulator.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, Response},
    routing::{get, post, put},
    Json, Router,
};
use bytes::Bytes;
use std::sync::Arc;

use crate::config::Config;
use crate::error::StreamResult;
use crate::handlers;
use crate::models::{CopyItemRequest, CreateItemRequest};
use crate::store::MemoryObjectStore;

/// Application state shared between handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<MemoryObjectStore>,
}

/// Creates the emulator router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/root", get(get_root))
        .route("/items/:id", get(get_item).delete(delete_item))
        .route("/items/:id/content", get(get_content))
        .route("/items/:id/children", get(list_children).post(create_child))
        .route("/items/:id/copy", post(copy_item))
        .route("/items/:id/move", post(move_item))
        .route("/items/:id/upload-session", post(create_upload_session))
        .route("/upload/:session_id", put(put_range))
        .with_state(state)
}

async fn get_root(State(state): State<AppState>) -> StreamResult<Response<Body>> {
    handlers::get_root(state.store).await
}

async fn get_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> StreamResult<Response<Body>> {
    handlers::get_item(state.store, &id).await
}

async fn delete_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> StreamResult<Response<Body>> {
    handlers::delete_item(state.store, &id).await
}

async fn get_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> StreamResult<Response<Body>> {
    handlers::get_content(state.store, &id).await
}

async fn list_children(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> StreamResult<Response<Body>> {
    handlers::list_children(state.store, &id).await
}

async fn create_child(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CreateItemRequest>,
) -> StreamResult<Response<Body>> {
    handlers::create_child(state.store, &id, request).await
}

async fn copy_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CopyItemRequest>,
) -> StreamResult<Response<Body>> {
    handlers::copy_item(state.store, &id, request).await
}

async fn move_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CopyItemRequest>,
) -> StreamResult<Response<Body>> {
    handlers::move_item(state.store, &id, request).await
}

async fn create_upload_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> StreamResult<Response<Body>> {
    handlers::create_upload_session(state.store, &id, &headers, &state.config.base_url()).await
}

async fn put_range(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StreamResult<Response<Body>> {
    handlers::put_range(state.store, &session_id, &headers, body).await
}
