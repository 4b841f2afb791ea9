//! Data models for remote items and upload sessions.

mod item;
mod upload;

pub use item::*;
pub use upload::*;
