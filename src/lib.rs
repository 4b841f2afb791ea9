//! Seekstream-rs: seekable buffered streams over remote objects.
//!
//! A [`BufferedRemoteStream`] lets callers seek, read, and write a remote
//! object as if it were a local random-access stream. Writes are buffered
//! locally and tracked as coalesced dirty ranges; a flush uploads each range
//! through the store's upload session, a bounded number at a time.
//!
//! The crate also ships [`UploadServer`], an emulator of the upload-session
//! API backed by [`MemoryObjectStore`], and [`HttpObjectStore`] to talk to it.
//!
//! # Example
//!
//! ```no_run
//! use std::io::SeekFrom;
//! use std::sync::Arc;
//! use seekstream_rs::{AccessMode, BufferedRemoteStream, MemoryObjectStore, StreamConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let store = Arc::new(MemoryObjectStore::new());
//!     let item = store.insert_file("log.bin", Vec::new())?;
//!
//!     let stream = BufferedRemoteStream::open(
//!         store.clone(),
//!         &item.id,
//!         AccessMode::ReadWrite,
//!         StreamConfig::default(),
//!     )
//!     .await?;
//!     stream.write(b"hello")?;
//!     stream.seek(SeekFrom::Start(1))?;
//!     stream.write(b"ELLO")?;
//!     stream.close().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod range;
pub mod router;
pub mod server;
pub mod store;
pub mod stream;

// Re-exports for convenience
pub use config::{Args, Config, StreamConfig, DEFAULT_PORT};
pub use error::{ErrorCode, StreamError, StreamResult};
pub use range::{DirtyRangeSet, RangeInterval};
pub use server::{UploadServer, UploadServerBuilder};
pub use store::{HttpObjectStore, MemoryObjectStore, RemoteObjectStore, TransportError};
pub use stream::{AccessMode, BufferedRemoteStream, FlushSummary, RangeUploader};
