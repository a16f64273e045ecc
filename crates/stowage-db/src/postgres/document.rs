use crate::repository::{like_pattern, DocumentRepository};
use stowage_core::models::Document;
use stowage_core::AppError;
use sqlx::{PgPool, Postgres};

#[derive(Clone)]
pub struct PgDocumentRepository {
    pool: PgPool,
}

impl PgDocumentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn patterns(needles: &[String]) -> Vec<String> {
    needles.iter().map(|n| like_pattern(n)).collect()
}

#[async_trait::async_trait]
impl DocumentRepository for PgDocumentRepository {
    #[tracing::instrument(skip(self), fields(db.table = "documents", db.operation = "select"))]
    async fn documents_containing(
        &self,
        needle: &str,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<Document>, AppError> {
        let rows = sqlx::query_as::<Postgres, Document>(
            r#"
            SELECT id, raw, cooked, render_version
            FROM documents
            WHERE raw LIKE $1 AND id > $2
            ORDER BY id
            LIMIT $3
            "#,
        )
        .bind(like_pattern(needle))
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    #[tracing::instrument(skip(self, raw), fields(db.table = "documents", db.operation = "update", db.record_id = %id))]
    async fn update_raw(&self, id: i64, raw: &str) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE documents SET raw = $1 WHERE id = $2")
            .bind(raw)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("document {}", id)));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "documents", db.operation = "update", db.record_id = %id))]
    async fn flag_for_rerender(&self, id: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE documents SET render_version = NULL WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "documents", db.operation = "update"))]
    async fn flag_cooked_containing(&self, needles: &[String]) -> Result<u64, AppError> {
        if needles.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET render_version = NULL
            WHERE render_version IS NOT NULL AND cooked LIKE ANY($1)
            "#,
        )
        .bind(patterns(needles))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    #[tracing::instrument(skip(self), fields(db.table = "documents", db.operation = "count"))]
    async fn count_stale_renders(
        &self,
        needles: &[String],
        current_version: i32,
    ) -> Result<u64, AppError> {
        if needles.is_empty() {
            return Ok(0);
        }
        let count: i64 = sqlx::query_scalar::<Postgres, i64>(
            "SELECT COUNT(*) FROM documents WHERE render_version = $1 AND cooked LIKE ANY($2)",
        )
        .bind(current_version)
        .bind(patterns(needles))
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    #[tracing::instrument(skip(self), fields(db.table = "documents", db.operation = "count"))]
    async fn count_needing_rerender(&self, current_version: i32) -> Result<u64, AppError> {
        let count: i64 = sqlx::query_scalar::<Postgres, i64>(
            "SELECT COUNT(*) FROM documents WHERE render_version IS NULL OR render_version <> $1",
        )
        .bind(current_version)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }
}
