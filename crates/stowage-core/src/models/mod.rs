//! Data models
//!
//! Records owned by the surrounding application that the storage layer reads and the
//! migration engine rewrites.

mod document;
mod upload;

pub use document::*;
pub use upload::*;
