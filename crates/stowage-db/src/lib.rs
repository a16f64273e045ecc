//! Database repositories for data access layer
//!
//! The migration engine only needs a handful of queries over two kinds of records:
//! uploads (with their optimized images) and documents. They are expressed as traits so
//! the engine can run against PostgreSQL in production and against the in-memory
//! implementations in tests.
//
// Repository traits
pub mod repository;
//
// PostgreSQL implementations
pub mod postgres;
//
// In-memory implementations
pub mod memory;

pub use memory::{MemoryDocumentRepository, MemoryUploadRepository};
pub use postgres::{PgDocumentRepository, PgUploadRepository};
pub use repository::{like_pattern, DocumentRepository, UploadRepository};
