//! Shared path handling for storage backends.
//!
//! Paths are content addressed: `original/{depth + 1}X/{tree}{sha1}{ext}` where `tree`
//! spreads large installations over nested directories named after the leading hex
//! characters of the hash. Both backends keep a path verbatim, so a local path and its
//! object key differ only by the key prefix.

use crate::traits::{StorageError, StorageResult};

/// Directory holding original uploads, relative to the uploads root.
pub const ORIGINAL_DIR: &str = "original";

/// Directory holding derived images, relative to the uploads root.
pub const OPTIMIZED_DIR: &str = "optimized";

/// Key prefix for tenant-scoped buckets: `uploads/{db}/`, or nothing.
pub fn tenant_prefix(db_name: &str, tenant_scoped: bool) -> String {
    if tenant_scoped {
        format!("uploads/{}/", db_name)
    } else {
        String::new()
    }
}

/// Relative URL prefix of locally served uploads: `/uploads/{db}/`.
pub fn local_url_prefix(db_name: &str) -> String {
    format!("/uploads/{}/", db_name)
}

/// Reject keys that could escape the storage root.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("Storage key is empty".to_string()));
    }
    if key.starts_with('/') || key.split('/').any(|segment| segment == "..") {
        return Err(StorageError::InvalidKey(
            "Storage key contains invalid characters".to_string(),
        ));
    }
    Ok(())
}

/// Drop a query string or fragment from a URL path.
pub(crate) fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}
