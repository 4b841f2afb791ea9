//! Remote object store collaborator.
//!
//! The buffered stream only needs [`RemoteObjectStore::read_content`],
//! [`RemoteObjectStore::open_upload_session`], [`RemoteObjectStore::put_range`]
//! and [`RemoteObjectStore::get_item`]. The remaining operations complete the
//! store contract for callers that manage items directly.

mod http_client;
mod memory;

pub use http_client::*;
pub use memory::*;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::models::{ContentRange, ItemKind, ItemModel, UploadSession};

/// Failure reported by a remote object store.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("item not found: {0}")]
    NotFound(String),

    #[error("item already exists: {0}")]
    AlreadyExists(String),

    #[error("upload session not found or expired: {0}")]
    SessionNotFound(String),

    #[error("invalid content range: {0}")]
    InvalidRange(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("injected failure: {0}")]
    Injected(String),
}

/// Trait for remote object store operations.
#[async_trait]
pub trait RemoteObjectStore: Send + Sync {
    /// Returns the metadata of an item.
    async fn get_item(&self, id: &str) -> Result<ItemModel, TransportError>;

    /// Returns the current content of a file item.
    async fn read_content(&self, id: &str) -> Result<Bytes, TransportError>;

    /// Opens an upload session good for any number of range uploads.
    async fn open_upload_session(&self, id: &str) -> Result<UploadSession, TransportError>;

    /// Uploads one contiguous chunk. Chunks may arrive in any order.
    async fn put_range(
        &self,
        session: &UploadSession,
        range: ContentRange,
        data: Bytes,
    ) -> Result<(), TransportError>;

    /// Lists the children of a folder.
    async fn list_children(&self, id: &str) -> Result<Vec<ItemModel>, TransportError>;

    /// Returns the root folder.
    async fn get_root(&self) -> Result<ItemModel, TransportError>;

    /// Returns the folder holding `id`, or None for the root.
    async fn get_parent(&self, id: &str) -> Result<Option<ItemModel>, TransportError> {
        let item = self.get_item(id).await?;
        match item.parent_id {
            Some(parent_id) => Ok(Some(self.get_item(&parent_id).await?)),
            None => Ok(None),
        }
    }

    /// Creates an empty file or folder under `parent_id`.
    ///
    /// An existing item of the same name is replaced when `overwrite` is set,
    /// otherwise the call fails with `AlreadyExists`.
    async fn create_item(
        &self,
        parent_id: &str,
        name: &str,
        kind: ItemKind,
        overwrite: bool,
    ) -> Result<ItemModel, TransportError>;

    /// Deletes an item and, for folders, everything below it.
    async fn delete_item(&self, id: &str) -> Result<(), TransportError>;

    /// Copies an item into `dest_parent_id`, optionally renaming it.
    ///
    /// A folder cannot be copied into itself or one of its descendants.
    async fn copy_item(
        &self,
        id: &str,
        dest_parent_id: &str,
        name: Option<&str>,
        overwrite: bool,
    ) -> Result<ItemModel, TransportError>;

    /// Moves an item into `dest_parent_id`, optionally renaming it.
    async fn move_item(
        &self,
        id: &str,
        dest_parent_id: &str,
        name: Option<&str>,
        overwrite: bool,
    ) -> Result<ItemModel, TransportError>;
}
