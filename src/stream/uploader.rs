//! Single-range upload helper.

use bytes::Bytes;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ErrorCode, StreamError, StreamResult};
use crate::models::{ContentRange, UploadSession};
use crate::range::RangeInterval;
use crate::store::RemoteObjectStore;

/// Uploads byte ranges of a local buffer through one upload session.
pub struct RangeUploader {
    store: Arc<dyn RemoteObjectStore>,
    session: UploadSession,
    max_put_size: Option<u64>,
}

impl RangeUploader {
    pub fn new(store: Arc<dyn RemoteObjectStore>, session: UploadSession) -> Self {
        Self {
            store,
            session,
            max_put_size: None,
        }
    }

    /// Splits ranges larger than `max` into several consecutive puts.
    pub fn with_max_put_size(mut self, max: Option<u64>) -> Self {
        self.max_put_size = max.filter(|&m| m > 0);
        self
    }

    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    /// Uploads `buffer[offset..offset + count]`.
    ///
    /// Each put carries `(start, end inclusive, buffer length)` so the remote
    /// side can place chunks received in any order.
    pub async fn upload_range(&self, buffer: &Bytes, offset: u64, count: u64) -> StreamResult<()> {
        let total = buffer.len() as u64;
        if offset >= total {
            return Err(StreamError::invalid_argument(format!(
                "Offset {} is outside a buffer of {} bytes",
                offset, total
            )));
        }
        if count == 0 || count > total - offset {
            return Err(StreamError::invalid_argument(format!(
                "Count {} at offset {} does not fit a buffer of {} bytes",
                count, offset, total
            )));
        }

        let start = offset as usize;
        let data = buffer.slice(start..start + count as usize);
        self.upload_slice(offset, data, total).await
    }

    /// Uploads `data`, which holds the bytes at `offset` of an object that is
    /// `total` bytes long.
    pub async fn upload_slice(&self, offset: u64, data: Bytes, total: u64) -> StreamResult<()> {
        let interval = RangeInterval::new(offset, data.len() as u64)?;
        if interval.end() > total {
            return Err(StreamError::invalid_argument(format!(
                "Range {} does not fit an object of {} bytes",
                interval, total
            )));
        }

        let pieces = match self.max_put_size {
            Some(max) => interval.split(max),
            None => vec![interval],
        };

        for piece in pieces {
            let range = ContentRange::new(piece.offset(), piece.end() - 1, total).ok_or_else(|| {
                StreamError::with_message(
                    ErrorCode::InternalError,
                    format!("Range {} cannot be described against {} bytes", piece, total),
                )
            })?;
            let local = (piece.offset() - offset) as usize;
            let chunk = data.slice(local..local + piece.count() as usize);

            debug!(
                "Uploading {} of item {} (session {})",
                range, self.session.item_id, self.session.id
            );
            self.store
                .put_range(&self.session, range, chunk)
                .await
                .map_err(|e| StreamError::upload_failed(interval, e))?;
        }

        Ok(())
    }

    /// Like [`RangeUploader::upload_range`], aborting with `Cancelled` once
    /// `cancel` fires.
    pub async fn upload_range_cancellable(
        &self,
        buffer: &Bytes,
        offset: u64,
        count: u64,
        cancel: &CancellationToken,
    ) -> StreamResult<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StreamError::new(ErrorCode::Cancelled)),
            result = self.upload_range(buffer, offset, count) => result,
        }
    }

    /// Like [`RangeUploader::upload_slice`], aborting with `Cancelled` once
    /// `cancel` fires.
    pub async fn upload_slice_cancellable(
        &self,
        offset: u64,
        data: Bytes,
        total: u64,
        cancel: &CancellationToken,
    ) -> StreamResult<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StreamError::new(ErrorCode::Cancelled)),
            result = self.upload_slice(offset, data, total) => result,
        }
    }
}
