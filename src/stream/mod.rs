//! Seekable buffered stream over a remote object.

mod buffered;
mod mode;
mod uploader;

pub use buffered::*;
pub use mode::*;
pub use uploader::*;
