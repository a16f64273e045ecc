use stowage_core::models::{Document, OptimizedImage, StoredFile};
use stowage_core::AppError;

/// Trait for upload repository operations
///
/// Listings are keyset paginated: pass the last id seen as `after_id` (0 to start) and
/// keep going until a page comes back shorter than `limit`.
#[async_trait::async_trait]
pub trait UploadRepository: Send + Sync {
    /// Uploads whose `url` starts with `prefix`, ordered by id.
    async fn uploads_with_url_prefix(
        &self,
        prefix: &str,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<StoredFile>, AppError>;

    async fn count_with_url_prefix(&self, prefix: &str) -> Result<u64, AppError>;

    async fn get_upload(&self, id: i64) -> Result<Option<StoredFile>, AppError>;

    async fn find_by_url(&self, url: &str) -> Result<Option<StoredFile>, AppError>;

    async fn update_url(&self, id: i64, url: &str) -> Result<(), AppError>;

    /// Optimized images whose `url` starts with `prefix`, ordered by id.
    async fn optimized_images_with_url_prefix(
        &self,
        prefix: &str,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<OptimizedImage>, AppError>;

    async fn delete_optimized_image(&self, id: i64) -> Result<(), AppError>;
}

/// Trait for document repository operations
#[async_trait::async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Documents whose `raw` source contains `needle`, ordered by id.
    async fn documents_containing(
        &self,
        needle: &str,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<Document>, AppError>;

    async fn update_raw(&self, id: i64, raw: &str) -> Result<(), AppError>;

    /// Invalidate the cached render. An external job regenerates it.
    async fn flag_for_rerender(&self, id: i64) -> Result<(), AppError>;

    /// Invalidate every current render containing any of `needles`. Returns how many
    /// documents were flagged.
    async fn flag_cooked_containing(&self, needles: &[String]) -> Result<u64, AppError>;

    /// Documents with a current render that still contains any of `needles`.
    async fn count_stale_renders(
        &self,
        needles: &[String],
        current_version: i32,
    ) -> Result<u64, AppError>;

    /// Documents without a render at `current_version`.
    async fn count_needing_rerender(&self, current_version: i32) -> Result<u64, AppError>;
}

/// `LIKE` pattern matching `needle` anywhere, with wildcards in the needle escaped.
pub fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// `LIKE` pattern matching values starting with `prefix`.
pub(crate) fn prefix_pattern(prefix: &str) -> String {
    let mut pattern = like_pattern(prefix);
    pattern.remove(0);
    pattern
}
