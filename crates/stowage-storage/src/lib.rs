//! Stowage Storage Library
//!
//! This crate provides the upload storage contract ([`FileStore`]) and its two
//! implementations: the local filesystem and an S3-compatible object store.
//!
//! # Layout
//!
//! Both backends use the same relative paths, so moving a file between them is a pure
//! path transformation:
//!
//! - **Local**: `{public_dir}/uploads/{db}/original/1X/{sha1}.png`, served as
//!   `/uploads/{db}/original/1X/{sha1}.png`
//! - **S3**: `[{folder}/][uploads/{db}/]original/1X/{sha1}.png`
//!
//! Removed files are moved into a tombstone (`{public_dir}/uploads/tombstone/{db}/…`
//! locally, a `tombstone/` key prefix remotely) and purged after a grace period.

pub mod content;
pub mod factory;
pub mod keys;
#[cfg(feature = "storage-s3")]
pub mod lifecycle;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod tombstone;
pub mod traits;
pub(crate) mod walk;

// Re-export commonly used types
pub use factory::create_file_store;
#[cfg(feature = "storage-s3")]
pub use lifecycle::{LifecyclePolicy, S3LifecycleRule};
#[cfg(feature = "storage-local")]
pub use local::{LocalObject, LocalStore};
#[cfg(feature = "storage-s3")]
pub use s3::{S3Location, S3Store};
pub use stowage_core::StorageBackend;
#[cfg(feature = "storage-s3")]
pub use tombstone::BucketTombstone;
#[cfg(feature = "storage-local")]
pub use tombstone::LocalTombstone;
pub use tombstone::{PurgeOutcome, Tombstone};
pub use traits::{FileStore, StorageError, StorageResult, StoreOptions};
