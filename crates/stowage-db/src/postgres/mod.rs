//! PostgreSQL repositories.
//!
//! Tables are owned by the application; this crate only reads and updates them:
//!
//! - `uploads (id, sha1, original_filename, filesize, extension, url, secure)`
//! - `optimized_images (id, upload_id, url, width, height)`
//! - `documents (id, raw, cooked, render_version)`

mod document;
mod upload;

pub use document::PgDocumentRepository;
pub use upload::PgUploadRepository;
