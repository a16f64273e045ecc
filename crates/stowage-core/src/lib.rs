//! Stowage Core Library
//!
//! This crate provides the domain models, error types and configuration shared by the
//! storage backends, the repositories and the migration engine.

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use config::{MigrationConfig, S3Config, StorageConfig};
pub use error::{AppError, ConfigError};
pub use storage_types::StorageBackend;
