//! HTTP client for a remote upload-session API.

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{RemoteObjectStore, TransportError};
use crate::models::{
    ContentRange, CopyItemRequest, CreateItemRequest, ItemKind, ItemModel, UploadSession,
};

/// Object store reached over HTTP.
///
/// Speaks the API served by [`crate::server::UploadServer`]: items under
/// `/items/{id}` and range uploads as `PUT` requests carrying a
/// `Content-Range` header against the session's upload URL.
#[derive(Clone)]
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: Url,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl HttpObjectStore {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self, TransportError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Joins path segments onto the base URL, percent-encoding each one.
    fn url_for(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                TransportError::InvalidArgument(format!("{} cannot be a base URL", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments.iter().filter(|s| !s.is_empty()));
        Ok(url)
    }

    fn item_url(&self, id: &str, suffix: &str) -> Result<Url, TransportError> {
        self.url_for(&["items", id, suffix])
    }

    fn upload_url(&self, session: &UploadSession) -> Result<Url, TransportError> {
        match session.upload_url.as_deref() {
            Some(url) => Ok(Url::parse(url)?),
            None => self.url_for(&["upload", &session.id]),
        }
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<ItemModel, TransportError> {
        let response = self.client.post(url).json(body).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Maps a non-success response to a transport error.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => (body.error.code, body.error.message),
            Err(_) => (String::new(), text),
        };

        Err(match (status.as_u16(), code.as_str()) {
            (404, "SessionNotFound") => TransportError::SessionNotFound(message),
            (404, _) => TransportError::NotFound(message),
            (409, _) => TransportError::AlreadyExists(message),
            (416, _) => TransportError::InvalidRange(message),
            (400, _) => TransportError::InvalidArgument(message),
            (status, _) => TransportError::Status { status, message },
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, TransportError> {
        let response = self.client.get(url).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

#[async_trait]
impl RemoteObjectStore for HttpObjectStore {
    async fn get_item(&self, id: &str) -> Result<ItemModel, TransportError> {
        self.get_json(self.item_url(id, "")?).await
    }

    async fn read_content(&self, id: &str) -> Result<Bytes, TransportError> {
        let response = self.client.get(self.item_url(id, "content")?).send().await?;
        Ok(Self::check(response).await?.bytes().await?)
    }

    async fn open_upload_session(&self, id: &str) -> Result<UploadSession, TransportError> {
        let response = self
            .client
            .post(self.item_url(id, "upload-session")?)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn put_range(
        &self,
        session: &UploadSession,
        range: ContentRange,
        data: Bytes,
    ) -> Result<(), TransportError> {
        let url = self.upload_url(session)?;
        debug!("PUT {} ({})", url, range);

        let response = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_RANGE, range.to_header())
            .body(data)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn list_children(&self, id: &str) -> Result<Vec<ItemModel>, TransportError> {
        self.get_json(self.item_url(id, "children")?).await
    }

    async fn get_root(&self) -> Result<ItemModel, TransportError> {
        self.get_json(self.url_for(&["root"])?).await
    }

    async fn create_item(
        &self,
        parent_id: &str,
        name: &str,
        kind: ItemKind,
        overwrite: bool,
    ) -> Result<ItemModel, TransportError> {
        let body = CreateItemRequest {
            name: name.to_string(),
            kind,
            overwrite,
        };
        self.post_json(self.item_url(parent_id, "children")?, &body)
            .await
    }

    async fn delete_item(&self, id: &str) -> Result<(), TransportError> {
        let response = self.client.delete(self.item_url(id, "")?).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn copy_item(
        &self,
        id: &str,
        dest_parent_id: &str,
        name: Option<&str>,
        overwrite: bool,
    ) -> Result<ItemModel, TransportError> {
        let body = CopyItemRequest {
            parent_id: dest_parent_id.to_string(),
            name: name.map(str::to_string),
            overwrite,
        };
        self.post_json(self.item_url(id, "copy")?, &body).await
    }

    async fn move_item(
        &self,
        id: &str,
        dest_parent_id: &str,
        name: Option<&str>,
        overwrite: bool,
    ) -> Result<ItemModel, TransportError> {
        let body = CopyItemRequest {
            parent_id: dest_parent_id.to_string(),
            name: name.map(str::to_string),
            overwrite,
        };
        self.post_json(self.item_url(id, "move")?, &body).await
    }
}
