use crate::repository::{prefix_pattern, UploadRepository};
use stowage_core::models::{OptimizedImage, StoredFile};
use stowage_core::AppError;
use sqlx::{PgPool, Postgres};

const UPLOAD_COLUMNS: &str = "id, sha1, original_filename, filesize, extension, url, secure";

#[derive(Clone)]
pub struct PgUploadRepository {
    pool: PgPool,
}

impl PgUploadRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UploadRepository for PgUploadRepository {
    #[tracing::instrument(skip(self), fields(db.table = "uploads", db.operation = "select"))]
    async fn uploads_with_url_prefix(
        &self,
        prefix: &str,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<StoredFile>, AppError> {
        let rows = sqlx::query_as::<Postgres, StoredFile>(&format!(
            "SELECT {} FROM uploads WHERE url LIKE $1 AND id > $2 ORDER BY id LIMIT $3",
            UPLOAD_COLUMNS
        ))
        .bind(prefix_pattern(prefix))
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    #[tracing::instrument(skip(self), fields(db.table = "uploads", db.operation = "count"))]
    async fn count_with_url_prefix(&self, prefix: &str) -> Result<u64, AppError> {
        let count: i64 =
            sqlx::query_scalar::<Postgres, i64>("SELECT COUNT(*) FROM uploads WHERE url LIKE $1")
                .bind(prefix_pattern(prefix))
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    #[tracing::instrument(skip(self), fields(db.table = "uploads", db.record_id = %id))]
    async fn get_upload(&self, id: i64) -> Result<Option<StoredFile>, AppError> {
        let row = sqlx::query_as::<Postgres, StoredFile>(&format!(
            "SELECT {} FROM uploads WHERE id = $1",
            UPLOAD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    #[tracing::instrument(skip(self), fields(db.table = "uploads", db.operation = "select"))]
    async fn find_by_url(&self, url: &str) -> Result<Option<StoredFile>, AppError> {
        let row = sqlx::query_as::<Postgres, StoredFile>(&format!(
            "SELECT {} FROM uploads WHERE url = $1 ORDER BY id LIMIT 1",
            UPLOAD_COLUMNS
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    #[tracing::instrument(skip(self), fields(db.table = "uploads", db.operation = "update", db.record_id = %id))]
    async fn update_url(&self, id: i64, url: &str) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE uploads SET url = $1 WHERE id = $2")
            .bind(url)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("upload {}", id)));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "optimized_images", db.operation = "select"))]
    async fn optimized_images_with_url_prefix(
        &self,
        prefix: &str,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<OptimizedImage>, AppError> {
        let rows = sqlx::query_as::<Postgres, OptimizedImage>(
            r#"
            SELECT id, upload_id, url, width, height
            FROM optimized_images
            WHERE url LIKE $1 AND id > $2
            ORDER BY id
            LIMIT $3
            "#,
        )
        .bind(prefix_pattern(prefix))
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    #[tracing::instrument(skip(self), fields(db.table = "optimized_images", db.operation = "delete", db.record_id = %id))]
    async fn delete_optimized_image(&self, id: i64) -> Result<(), AppError> {
        sqlx::query("DELETE FROM optimized_images WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
