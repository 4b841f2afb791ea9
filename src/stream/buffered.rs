//! Buffered remote stream with coalesced range flushes.

use bytes::Bytes;
use futures::future::{join_all, BoxFuture};
use parking_lot::Mutex;
use std::io::SeekFrom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{AccessMode, RangeUploader};
use crate::config::StreamConfig;
use crate::error::{ErrorCode, StreamError, StreamResult};
use crate::models::UploadSession;
use crate::range::{DirtyRangeSet, RangeInterval};
use crate::store::RemoteObjectStore;

/// Outcome of a successful flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    /// Dirty ranges uploaded.
    pub ranges: usize,
    /// Bytes uploaded.
    pub bytes: u64,
    /// Upload batches started.
    pub batches: usize,
}

/// A seekable stream over a remote object.
///
/// Reads and writes go to a local backing buffer. Every write registers its
/// byte range in a [`DirtyRangeSet`]; [`flush`](Self::flush) uploads the
/// coalesced ranges in batches of at most
/// [`StreamConfig::upload_concurrency`] concurrent range uploads.
///
/// Flushes first move the cursor to the end of the content, which keeps
/// subsequent writes appending after the last checkpoint. Disable with
/// [`StreamConfig::seek_to_end_on_flush`].
///
/// Always finish with [`close`](Self::close) (or use
/// [`scoped`](Self::scoped)). Dropping a stream that still has pending writes
/// spawns the final flush on the current tokio runtime.
pub struct BufferedRemoteStream {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    item_id: String,
    mode: AccessMode,
    config: StreamConfig,
    uploader: Mutex<Option<Arc<RangeUploader>>>,
    state: Mutex<StreamState>,
    dirty: DirtyRangeSet,
    closed: AtomicBool,
    /// Serializes flushes so two generations of ranges never upload at once.
    flush_lock: tokio::sync::Mutex<()>,
}

struct StreamState {
    buffer: Vec<u8>,
    position: u64,
    /// Set under the lock before the final drain; later writes are refused.
    closing: bool,
}

fn to_usize(value: u64) -> StreamResult<usize> {
    usize::try_from(value).map_err(|_| {
        StreamError::invalid_argument(format!("{} exceeds the addressable buffer size", value))
    })
}

impl BufferedRemoteStream {
    /// Opens a stream over the item `item_id`.
    ///
    /// Readable modes load the current remote content into the backing
    /// buffer. Writable modes open an upload session; write-only streams
    /// start from an empty buffer.
    pub async fn open(
        store: Arc<dyn RemoteObjectStore>,
        item_id: &str,
        mode: AccessMode,
        config: StreamConfig,
    ) -> StreamResult<Self> {
        let item = store
            .get_item(item_id)
            .await
            .map_err(|e| StreamError::open_failed(item_id, e))?;
        if item.is_folder() {
            return Err(StreamError::with_message(
                ErrorCode::NotSupported,
                format!("Item {} is a folder", item_id),
            ));
        }

        let content = if mode.can_read() {
            store
                .read_content(item_id)
                .await
                .map_err(|e| StreamError::open_failed(item_id, e))?
        } else {
            Bytes::new()
        };

        let session = if mode.can_write() {
            Some(
                store
                    .open_upload_session(item_id)
                    .await
                    .map_err(|e| StreamError::open_failed(item_id, e))?,
            )
        } else {
            None
        };

        debug!(
            "Opened item {} for {} ({} bytes)",
            item_id,
            mode.as_str(),
            content.len()
        );
        Self::from_parts(store, item_id, mode, config, content, session)
    }

    /// Builds a stream from content and a session that were already fetched.
    ///
    /// Writable modes require an upload session.
    pub fn from_parts(
        store: Arc<dyn RemoteObjectStore>,
        item_id: impl Into<String>,
        mode: AccessMode,
        config: StreamConfig,
        content: Bytes,
        session: Option<UploadSession>,
    ) -> StreamResult<Self> {
        let uploader = match (mode.can_write(), session) {
            (true, Some(session)) => Some(Arc::new(
                RangeUploader::new(store, session).with_max_put_size(config.max_put_size),
            )),
            (true, None) => {
                return Err(StreamError::invalid_argument(
                    "A writable stream needs an upload session",
                ))
            }
            (false, _) => None,
        };

        Ok(Self {
            inner: Arc::new(StreamInner {
                item_id: item_id.into(),
                mode,
                config,
                uploader: Mutex::new(uploader),
                state: Mutex::new(StreamState {
                    buffer: content.to_vec(),
                    position: 0,
                    closing: false,
                }),
                dirty: DirtyRangeSet::new(),
                closed: AtomicBool::new(false),
                flush_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// Runs `body` against the stream and closes it afterwards, whether the
    /// body succeeded or not. A body error takes precedence over a close
    /// error.
    pub async fn scoped<T, F>(self, body: F) -> StreamResult<T>
    where
        F: for<'a> FnOnce(&'a BufferedRemoteStream) -> BoxFuture<'a, StreamResult<T>>,
    {
        let result = body(&self).await;
        let closed = self.close().await;
        match (result, closed) {
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
            (Ok(value), Ok(())) => Ok(value),
        }
    }

    pub fn item_id(&self) -> &str {
        &self.inner.item_id
    }

    pub fn mode(&self) -> AccessMode {
        self.inner.mode
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn can_read(&self) -> bool {
        self.inner.mode.can_read() && !self.is_closed()
    }

    pub fn can_write(&self) -> bool {
        self.inner.mode.can_write() && !self.is_closed()
    }

    pub fn can_seek(&self) -> bool {
        !self.is_closed()
    }

    /// Current cursor position.
    pub fn position(&self) -> u64 {
        self.inner.state.lock().position
    }

    /// Logical length of the content.
    pub fn len(&self) -> u64 {
        self.inner.state.lock().buffer.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The upload session used for writing, if any.
    pub fn upload_session(&self) -> Option<UploadSession> {
        self.inner
            .uploader
            .lock()
            .as_ref()
            .map(|u| u.session().clone())
    }

    /// Pending dirty ranges, sorted and pairwise disjoint.
    pub fn dirty_ranges(&self) -> Vec<RangeInterval> {
        self.inner.dirty.snapshot()
    }

    /// Moves the cursor. Targets past the end are clamped to the length.
    pub fn seek(&self, pos: SeekFrom) -> StreamResult<u64> {
        self.inner.ensure_open()?;
        let mut state = self.inner.state.lock();
        let len = state.buffer.len() as i128;

        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::End(delta) => len + delta as i128,
            SeekFrom::Current(delta) => state.position as i128 + delta as i128,
        };
        if target < 0 {
            return Err(StreamError::invalid_argument(format!(
                "Seek to {:?} would move before the start of the stream",
                pos
            )));
        }

        state.position = target.min(len) as u64;
        Ok(state.position)
    }

    /// Copies bytes at the cursor into `buf`. Returns 0 at end of stream.
    pub fn read(&self, buf: &mut [u8]) -> StreamResult<usize> {
        self.inner.ensure_open()?;
        self.inner.ensure_mode(self.inner.mode.can_read(), "reading")?;

        let mut state = self.inner.state.lock();
        let start = to_usize(state.position)?.min(state.buffer.len());
        let n = buf.len().min(state.buffer.len() - start);
        buf[..n].copy_from_slice(&state.buffer[start..start + n]);
        state.position += n as u64;
        Ok(n)
    }

    /// Reads one byte, or None at end of stream.
    pub fn read_byte(&self) -> StreamResult<Option<u8>> {
        let mut byte = [0u8; 1];
        Ok(match self.read(&mut byte)? {
            0 => None,
            _ => Some(byte[0]),
        })
    }

    /// Writes `data` at the cursor, extending the content if needed.
    pub fn write(&self, data: &[u8]) -> StreamResult<usize> {
        self.inner.ensure_open()?;
        self.inner.ensure_mode(self.inner.mode.can_write(), "writing")?;
        if data.is_empty() {
            return Ok(0);
        }

        let mut state = self.inner.state.lock();
        let offset = state.position;
        self.inner.write_locked(&mut state, offset, data)?;
        state.position = offset + data.len() as u64;
        Ok(data.len())
    }

    /// Writes `buf[offset..offset + count]` at the cursor.
    pub fn write_slice(&self, buf: &[u8], offset: usize, count: usize) -> StreamResult<usize> {
        let end = offset.checked_add(count).filter(|&end| end <= buf.len());
        match end {
            Some(end) => self.write(&buf[offset..end]),
            None => Err(StreamError::invalid_argument(format!(
                "Offset {} and count {} exceed a buffer of {} bytes",
                offset,
                count,
                buf.len()
            ))),
        }
    }

    pub fn write_byte(&self, byte: u8) -> StreamResult<()> {
        self.write(&[byte]).map(|_| ())
    }

    /// Writes `data` at `offset` without moving the cursor.
    ///
    /// Writing past the end zero-fills the gap, which becomes dirty as well.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> StreamResult<usize> {
        self.inner.ensure_open()?;
        self.inner.ensure_mode(self.inner.mode.can_write(), "writing")?;
        if data.is_empty() {
            return Ok(0);
        }

        let mut state = self.inner.state.lock();
        self.inner.write_locked(&mut state, offset, data)?;
        Ok(data.len())
    }

    /// Uploads every pending dirty range.
    ///
    /// Read-only streams flush nothing. On failure the ranges that were not
    /// uploaded are kept pending, so calling `flush` again retries them.
    pub async fn flush(&self) -> StreamResult<FlushSummary> {
        self.flush_with_cancel(&CancellationToken::new()).await
    }

    /// Like [`flush`](Self::flush), aborting with `Cancelled` once `cancel`
    /// fires. A cancelled flush may have uploaded some ranges; the rest stay
    /// pending and must be flushed again.
    pub async fn flush_with_cancel(&self, cancel: &CancellationToken) -> StreamResult<FlushSummary> {
        self.inner.ensure_open()?;
        let _guard = self.inner.flush_lock.lock().await;
        self.inner.ensure_open()?;
        self.inner.flush_locked(cancel).await
    }

    /// Performs one final flush, then releases the buffer and upload session.
    ///
    /// The stream is closed even if that flush fails; its error is returned.
    /// Closing an already closed stream does nothing.
    pub async fn close(&self) -> StreamResult<()> {
        self.inner.close().await
    }
}

impl StreamInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> StreamResult<()> {
        if self.is_closed() {
            return Err(StreamError::new(ErrorCode::StreamClosed));
        }
        Ok(())
    }

    fn ensure_mode(&self, allowed: bool, operation: &str) -> StreamResult<()> {
        if !allowed {
            return Err(StreamError::with_message(
                ErrorCode::NotSupported,
                format!(
                    "The stream was opened for {} and does not support {}",
                    self.mode.as_str(),
                    operation
                ),
            ));
        }
        Ok(())
    }

    /// Copies `data` into the buffer at `offset` and registers the dirty range.
    fn write_locked(&self, state: &mut StreamState, offset: u64, data: &[u8]) -> StreamResult<()> {
        if state.closing {
            return Err(StreamError::new(ErrorCode::StreamClosed));
        }
        let interval = RangeInterval::new(offset, data.len() as u64)?;
        let start = to_usize(offset)?;
        let end = to_usize(interval.end())?;

        let old_len = state.buffer.len();
        if end > old_len {
            state.buffer.resize(end, 0);
        }
        state.buffer[start..end].copy_from_slice(data);

        if start > old_len {
            self.dirty
                .insert(RangeInterval::from_bounds(old_len as u64, offset)?);
        }
        self.dirty.insert(interval);
        Ok(())
    }

    async fn flush_locked(&self, cancel: &CancellationToken) -> StreamResult<FlushSummary> {
        if !self.mode.can_write() {
            return Ok(FlushSummary::default());
        }
        let uploader = self.uploader.lock().clone().ok_or_else(|| {
            StreamError::with_message(
                ErrorCode::NotSupported,
                "Cannot write to this stream. The upload session is not available.",
            )
        })?;

        // Only the drained ranges are copied out of the buffer.
        let (pieces, total) = {
            let mut state = self.state.lock();
            if self.config.seek_to_end_on_flush {
                state.position = state.buffer.len() as u64;
            }
            let ranges = self.dirty.drain_all();
            if ranges.is_empty() {
                debug!("Nothing to flush for item {}", self.item_id);
                return Ok(FlushSummary::default());
            }
            let pieces: Vec<(RangeInterval, Bytes)> = ranges
                .into_iter()
                .map(|range| {
                    let start = range.offset() as usize;
                    let end = range.end() as usize;
                    (range, Bytes::copy_from_slice(&state.buffer[start..end]))
                })
                .collect();
            (pieces, state.buffer.len() as u64)
        };
        let ranges: Vec<RangeInterval> = pieces.iter().map(|(range, _)| *range).collect();

        let width = self.config.batch_width();
        let mut summary = FlushSummary::default();

        for (index, batch) in pieces.chunks(width).enumerate() {
            let started = index * width;
            if cancel.is_cancelled() {
                self.dirty.insert_all(ranges[started..].iter().copied());
                warn!(
                    "Flush of item {} cancelled with {} ranges pending",
                    self.item_id,
                    ranges.len() - started
                );
                return Err(StreamError::new(ErrorCode::Cancelled));
            }

            summary.batches += 1;
            let results = join_all(batch.iter().map(|(range, data)| {
                uploader.upload_slice_cancellable(range.offset(), data.clone(), total, cancel)
            }))
            .await;

            let mut failed = Vec::new();
            let mut errors = Vec::new();
            for ((range, _), result) in batch.iter().zip(results) {
                match result {
                    Ok(()) => {
                        summary.ranges += 1;
                        summary.bytes += range.count();
                    }
                    Err(e) => {
                        failed.push(*range);
                        errors.push(e);
                    }
                }
            }

            if !errors.is_empty() {
                let remaining = &ranges[started + batch.len()..];
                self.dirty
                    .insert_all(failed.iter().chain(remaining).copied());
                warn!(
                    "Flush of item {} failed: {} of {} ranges in batch {} failed, {} not started",
                    self.item_id,
                    failed.len(),
                    batch.len(),
                    index + 1,
                    remaining.len()
                );
                return Err(Self::flush_error(errors));
            }
        }

        info!(
            "Flushed {} ranges ({} bytes) in {} batches for item {}",
            summary.ranges, summary.bytes, summary.batches, self.item_id
        );
        Ok(summary)
    }

    /// Collapses a batch's failures into one error, preferring cancellation.
    fn flush_error(mut errors: Vec<StreamError>) -> StreamError {
        let lead = errors
            .iter()
            .position(|e| e.is(ErrorCode::Cancelled))
            .unwrap_or(0);
        let first = errors.remove(lead);
        first.with_related(errors)
    }

    async fn close(&self) -> StreamResult<()> {
        let _guard = self.flush_lock.lock().await;
        if self.is_closed() {
            return Ok(());
        }
        self.state.lock().closing = true;

        let result = self.flush_locked(&CancellationToken::new()).await;
        if let Err(e) = &result {
            warn!(
                "Final flush of item {} failed, {} ranges dropped: {}",
                self.item_id,
                self.dirty.len(),
                e
            );
        }
        self.release();
        result.map(|_| ())
    }

    fn release(&self) {
        self.closed.store(true, Ordering::Release);
        self.uploader.lock().take();
        self.dirty.clear();
        let mut state = self.state.lock();
        state.buffer = Vec::new();
        state.position = 0;
        debug!("Closed stream for item {}", self.item_id);
    }
}

impl Drop for BufferedRemoteStream {
    fn drop(&mut self) {
        if self.inner.is_closed() {
            return;
        }
        if self.inner.dirty.is_empty() {
            self.inner.release();
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    "Stream for item {} dropped without close; flushing in the background",
                    self.inner.item_id
                );
                let inner = self.inner.clone();
                handle.spawn(async move {
                    if let Err(e) = inner.close().await {
                        warn!("Background close of item {} failed: {}", inner.item_id, e);
                    }
                });
            }
            Err(_) => {
                warn!(
                    "Stream for item {} dropped outside a runtime with {} unflushed ranges",
                    self.inner.item_id,
                    self.inner.dirty.len()
                );
                self.inner.release();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryObjectStore;
    use std::time::Duration;

    fn iv(offset: u64, count: u64) -> RangeInterval {
        RangeInterval::new(offset, count).unwrap()
    }

    async fn open(
        store: &Arc<MemoryObjectStore>,
        content: &[u8],
        mode: AccessMode,
        config: StreamConfig,
    ) -> (BufferedRemoteStream, String) {
        let item = store.insert_file("file.bin", content.to_vec()).unwrap();
        let stream = BufferedRemoteStream::open(store.clone(), &item.id, mode, config)
            .await
            .unwrap();
        (stream, item.id)
    }

    fn serial() -> StreamConfig {
        StreamConfig::default().upload_concurrency(1)
    }

    #[tokio::test]
    async fn test_read_prepopulated_content() {
        let store = Arc::new(MemoryObjectStore::new());
        let (stream, _) = open(&store, b"hello world", AccessMode::Read, serial()).await;

        let mut buf = [0u8; 5];
        assert_eq!(stream.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(stream.position(), 5);

        stream.seek(SeekFrom::End(-5)).unwrap();
        let mut rest = [0u8; 16];
        assert_eq!(stream.read(&mut rest).unwrap(), 5);
        assert_eq!(&rest[..5], b"world");
        assert_eq!(stream.read(&mut rest).unwrap(), 0);
        assert_eq!(stream.read_byte().unwrap(), None);
    }

    #[tokio::test]
    async fn test_mode_errors_are_immediate() {
        let store = Arc::new(MemoryObjectStore::new());
        let (reader, _) = open(&store, b"abc", AccessMode::Read, serial()).await;
        let err = reader.write(b"x").unwrap_err();
        assert_eq!(err.code, ErrorCode::NotSupported);
        assert_eq!(reader.flush().await.unwrap(), FlushSummary::default());

        let store = Arc::new(MemoryObjectStore::new());
        let (writer, _) = open(&store, b"abc", AccessMode::Write, serial()).await;
        let mut buf = [0u8; 1];
        assert_eq!(writer.read(&mut buf).unwrap_err().code, ErrorCode::NotSupported);
        assert!(writer.is_empty());
    }

    #[tokio::test]
    async fn test_seek_rules() {
        let store = Arc::new(MemoryObjectStore::new());
        let (stream, _) = open(&store, b"0123456789", AccessMode::ReadWrite, serial()).await;

        assert_eq!(stream.seek(SeekFrom::Start(4)).unwrap(), 4);
        assert_eq!(stream.seek(SeekFrom::Current(-2)).unwrap(), 2);
        assert_eq!(stream.seek(SeekFrom::End(0)).unwrap(), 10);
        assert_eq!(stream.seek(SeekFrom::Start(50)).unwrap(), 10);

        let err = stream.seek(SeekFrom::Current(-11)).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
        assert_eq!(stream.position(), 10);
        assert!(store.put_log().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_writes_coalesce() {
        let store = Arc::new(MemoryObjectStore::new());
        let (stream, id) = open(&store, b"", AccessMode::ReadWrite, serial()).await;

        stream.write(&[1u8; 10]).unwrap();
        stream.seek(SeekFrom::Start(5)).unwrap();
        stream.write(&[2u8; 10]).unwrap();
        assert_eq!(stream.dirty_ranges(), vec![iv(0, 15)]);

        let summary = stream.flush().await.unwrap();
        assert_eq!(summary.ranges, 1);
        assert_eq!(summary.bytes, 15);
        assert_eq!(store.put_log().len(), 1);

        let mut expected = vec![1u8; 5];
        expected.extend([2u8; 10]);
        assert_eq!(store.content(&id).unwrap(), Bytes::from(expected));
    }

    #[tokio::test]
    async fn test_separate_writes_upload_separately() {
        let store = Arc::new(MemoryObjectStore::new());
        let (stream, _) = open(&store, &[0u8; 30], AccessMode::ReadWrite, serial()).await;

        stream.write(b"aaaaa").unwrap();
        stream.seek(SeekFrom::Start(20)).unwrap();
        stream.write(b"bbbbb").unwrap();
        assert_eq!(stream.dirty_ranges(), vec![iv(0, 5), iv(20, 5)]);

        let summary = stream.flush().await.unwrap();
        assert_eq!(summary.ranges, 2);
        assert_eq!(summary.batches, 2);
        let starts: Vec<u64> = store.put_log().iter().map(|r| r.start()).collect();
        assert_eq!(starts, vec![0, 20]);
    }

    #[tokio::test]
    async fn test_empty_flush_uploads_nothing() {
        let store = Arc::new(MemoryObjectStore::new());
        let (stream, _) = open(&store, b"abc", AccessMode::ReadWrite, serial()).await;

        assert_eq!(stream.flush().await.unwrap(), FlushSummary::default());
        stream.write(b"x").unwrap();
        stream.flush().await.unwrap();
        assert_eq!(stream.flush().await.unwrap(), FlushSummary::default());
        assert_eq!(store.put_log().len(), 1);
    }

    #[tokio::test]
    async fn test_second_flush_uploads_only_new_range() {
        let store = Arc::new(MemoryObjectStore::new());
        let (stream, id) = open(&store, b"", AccessMode::ReadWrite, serial()).await;

        stream.write(b"abcde").unwrap();
        stream.flush().await.unwrap();
        assert_eq!(stream.position(), 5);

        stream.seek(SeekFrom::Start(2)).unwrap();
        stream.write(b"XYZWV").unwrap();
        stream.flush().await.unwrap();

        let log = store.put_log();
        assert_eq!(log.len(), 2);
        assert_eq!((log[1].start(), log[1].end(), log[1].total()), (2, 6, 7));
        assert_eq!(store.content(&id).unwrap(), Bytes::from_static(b"abXYZWV"));
    }

    #[tokio::test]
    async fn test_flush_moves_cursor_to_end() {
        let store = Arc::new(MemoryObjectStore::new());
        let (stream, _) = open(&store, b"0123456789", AccessMode::ReadWrite, serial()).await;
        stream.write(b"ab").unwrap();
        stream.flush().await.unwrap();
        assert_eq!(stream.position(), 10);

        let store = Arc::new(MemoryObjectStore::new());
        let config = serial().seek_to_end_on_flush(false);
        let (stream, _) = open(&store, b"0123456789", AccessMode::ReadWrite, config).await;
        stream.write(b"ab").unwrap();
        stream.flush().await.unwrap();
        assert_eq!(stream.position(), 2);
    }

    #[tokio::test]
    async fn test_failed_batch_keeps_ranges_pending() {
        let store = Arc::new(MemoryObjectStore::new());
        let (stream, id) = open(&store, &[0u8; 30], AccessMode::ReadWrite, serial()).await;

        for offset in [0u64, 10, 20] {
            stream.seek(SeekFrom::Start(offset)).unwrap();
            stream.write(b"xx").unwrap();
        }
        store.fail_once_at(10);

        let err = stream.flush().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::UploadFailed);
        assert_eq!(err.range, Some(iv(10, 2)));
        assert_eq!(stream.dirty_ranges(), vec![iv(10, 2), iv(20, 2)]);
        assert_eq!(store.put_log().len(), 1);

        let summary = stream.flush().await.unwrap();
        assert_eq!(summary.ranges, 2);
        assert!(stream.dirty_ranges().is_empty());

        let content = store.content(&id).unwrap();
        for offset in [0usize, 10, 20] {
            assert_eq!(&content[offset..offset + 2], b"xx");
        }
    }

    #[tokio::test]
    async fn test_batch_failures_are_aggregated() {
        let store = Arc::new(MemoryObjectStore::new());
        let config = StreamConfig::default().upload_concurrency(4);
        let (stream, _) = open(&store, &[0u8; 40], AccessMode::ReadWrite, config).await;

        for offset in [0u64, 10, 20, 30] {
            stream.write_at(offset, b"y").unwrap();
        }
        store.fail_once_at(0);
        store.fail_once_at(30);

        let err = stream.flush().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::UploadFailed);
        assert_eq!(err.related.len(), 1);
        assert_eq!(stream.dirty_ranges(), vec![iv(0, 1), iv(30, 1)]);
        assert_eq!(store.put_log().len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_flush_can_be_retried() {
        let store = Arc::new(MemoryObjectStore::new());
        let (stream, _) = open(&store, &[0u8; 10], AccessMode::ReadWrite, serial()).await;
        stream.write_at(0, b"a").unwrap();
        stream.write_at(5, b"b").unwrap();

        store.set_put_delay(Some(Duration::from_secs(30)));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = stream.flush_with_cancel(&cancel).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Cancelled);
        assert_eq!(stream.dirty_ranges(), vec![iv(0, 1), iv(5, 1)]);

        store.set_put_delay(None);
        assert_eq!(stream.flush().await.unwrap().ranges, 2);
    }

    #[tokio::test]
    async fn test_write_slice_and_write_at() {
        let store = Arc::new(MemoryObjectStore::new());
        let (stream, id) = open(&store, b"", AccessMode::Write, serial()).await;

        let err = stream.write_slice(b"abc", 2, 5).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
        assert_eq!(stream.write_slice(b"abcdef", 1, 3).unwrap(), 3);
        assert_eq!(stream.position(), 3);

        stream.write_at(6, b"zz").unwrap();
        assert_eq!(stream.position(), 3);
        assert_eq!(stream.len(), 8);
        assert_eq!(stream.dirty_ranges(), vec![iv(0, 8)]);

        stream.write_byte(b'!').unwrap();
        assert_eq!(stream.write(b"").unwrap(), 0);
        stream.close().await.unwrap();
        assert_eq!(store.content(&id).unwrap(), Bytes::from_static(b"bcd!\0\0zz"));
    }

    #[tokio::test]
    async fn test_concurrent_positional_writers() {
        let store = Arc::new(MemoryObjectStore::new());
        let (stream, id) = open(&store, b"", AccessMode::Write, StreamConfig::default()).await;
        let stream = Arc::new(stream);

        let writers: Vec<_> = (0..8u64)
            .map(|w| {
                let stream = stream.clone();
                tokio::spawn(async move {
                    for chunk in 0..16u64 {
                        let offset = (chunk * 8 + w) * 64;
                        stream.write_at(offset, &[w as u8; 64]).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        assert_eq!(stream.dirty_ranges(), vec![iv(0, 8 * 16 * 64)]);
        let summary = stream.flush().await.unwrap();
        assert_eq!(summary.ranges, 1);

        let content = store.content(&id).unwrap();
        assert_eq!(content.len(), 8 * 16 * 64);
        assert_eq!(content[64 * 3], 3);
    }

    #[tokio::test]
    async fn test_close_flushes_once_and_is_terminal() {
        let store = Arc::new(MemoryObjectStore::new());
        let (stream, id) = open(&store, b"", AccessMode::ReadWrite, serial()).await;
        stream.write(b"pending").unwrap();

        stream.close().await.unwrap();
        stream.close().await.unwrap();
        assert_eq!(store.put_log().len(), 1);
        assert_eq!(store.content(&id).unwrap(), Bytes::from_static(b"pending"));

        assert!(stream.is_closed());
        assert!(!stream.can_read() && !stream.can_write() && !stream.can_seek());
        assert!(stream.upload_session().is_none());
        assert_eq!(stream.write(b"x").unwrap_err().code, ErrorCode::StreamClosed);
        assert_eq!(stream.seek(SeekFrom::Start(0)).unwrap_err().code, ErrorCode::StreamClosed);
        assert_eq!(stream.flush().await.unwrap_err().code, ErrorCode::StreamClosed);
    }

    #[tokio::test]
    async fn test_write_during_flush_goes_to_next_flush() {
        let store = Arc::new(MemoryObjectStore::new());
        let config = serial().seek_to_end_on_flush(false);
        let (stream, id) = open(&store, b"", AccessMode::ReadWrite, config).await;
        let stream = Arc::new(stream);
        stream.write(b"first").unwrap();

        store.set_put_delay(Some(Duration::from_millis(200)));
        let flusher = {
            let stream = stream.clone();
            tokio::spawn(async move { stream.flush().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        stream.write_at(5, b"second").unwrap();

        let first = flusher.await.unwrap().unwrap();
        assert_eq!(first.bytes, 5);
        assert_eq!(stream.dirty_ranges(), vec![iv(5, 6)]);

        store.set_put_delay(None);
        let second = stream.flush().await.unwrap();
        assert_eq!(second.bytes, 6);
        assert_eq!(store.put_log().len(), 2);
        assert_eq!(store.content(&id).unwrap(), Bytes::from_static(b"firstsecond"));
    }

    #[tokio::test]
    async fn test_write_during_close_is_refused() {
        let store = Arc::new(MemoryObjectStore::new());
        let (stream, id) = open(&store, b"", AccessMode::Write, serial()).await;
        let stream = Arc::new(stream);
        stream.write(b"first").unwrap();

        store.set_put_delay(Some(Duration::from_millis(200)));
        let closer = {
            let stream = stream.clone();
            tokio::spawn(async move { stream.close().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stream.write(b"second").unwrap_err().code, ErrorCode::StreamClosed);
        assert_eq!(stream.write_at(0, b"x").unwrap_err().code, ErrorCode::StreamClosed);

        closer.await.unwrap().unwrap();
        assert!(stream.is_closed());
        assert_eq!(store.put_log().len(), 1);
        assert_eq!(store.content(&id).unwrap(), Bytes::from_static(b"first"));
    }

    #[tokio::test]
    async fn test_flush_uploads_only_dirty_bytes() {
        let store = Arc::new(MemoryObjectStore::new());
        let (stream, id) = open(&store, &[b'.'; 4096], AccessMode::ReadWrite, serial()).await;

        stream.write_at(1000, b"ab").unwrap();
        stream.write_at(4000, b"cd").unwrap();
        let summary = stream.flush().await.unwrap();
        assert_eq!(summary.bytes, 4);

        let log = store.put_log();
        assert_eq!(log.iter().map(|r| r.len()).sum::<u64>(), 4);
        assert!(log.iter().all(|r| r.total() == 4096));
        let content = store.content(&id).unwrap();
        assert_eq!(&content[1000..1002], b"ab");
        assert_eq!(&content[4000..4002], b"cd");
        assert_eq!(content[999], b'.');
    }

    #[tokio::test]
    async fn test_scoped_closes_after_body_error() {
        let store = Arc::new(MemoryObjectStore::new());
        let (stream, id) = open(&store, b"", AccessMode::ReadWrite, serial()).await;

        let result: StreamResult<()> = stream
            .scoped(|s| {
                Box::pin(async move {
                    s.write(b"kept")?;
                    s.seek(SeekFrom::Current(-100))?;
                    Ok::<(), StreamError>(())
                })
            })
            .await;

        assert_eq!(result.unwrap_err().code, ErrorCode::InvalidArgument);
        assert_eq!(store.put_log().len(), 1);
        assert_eq!(store.content(&id).unwrap(), Bytes::from_static(b"kept"));
    }

    #[tokio::test]
    async fn test_drop_without_close_flushes_in_background() {
        let store = Arc::new(MemoryObjectStore::new());
        let (stream, id) = open(&store, b"", AccessMode::Write, serial()).await;
        stream.write(b"late").unwrap();
        drop(stream);

        for _ in 0..100 {
            if !store.put_log().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.put_log().len(), 1);
        assert_eq!(store.content(&id).unwrap(), Bytes::from_static(b"late"));
    }

    #[tokio::test]
    async fn test_open_missing_item() {
        let store: Arc<dyn RemoteObjectStore> = Arc::new(MemoryObjectStore::new());
        let err = BufferedRemoteStream::open(store, "missing", AccessMode::Read, serial())
            .await
            .err()
            .unwrap();
        assert_eq!(err.code, ErrorCode::ItemNotFound);
    }

    #[test]
    fn test_writable_stream_needs_session() {
        let store: Arc<dyn RemoteObjectStore> = Arc::new(MemoryObjectStore::new());
        let result = BufferedRemoteStream::from_parts(
            store,
            "id",
            AccessMode::Write,
            StreamConfig::default(),
            Bytes::new(),
            None,
        );
        assert_eq!(result.err().unwrap().code, ErrorCode::InvalidArgument);
    }
}
