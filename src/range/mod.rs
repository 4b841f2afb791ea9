//! Dirty byte-range tracking.

mod dirty;
mod interval;

pub use dirty::*;
pub use interval::*;
