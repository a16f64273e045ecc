use serde::{Deserialize, Serialize};

/// A user-contributed binary object.
///
/// `url` is the currently resolvable location: a relative path such as
/// `/uploads/default/original/1X/<sha1>.png` while the bytes live on local disk, or an
/// absolute bucket URL once they live in the object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StoredFile {
    pub id: i64,
    pub sha1: String,
    pub original_filename: String,
    pub filesize: i64,
    pub extension: Option<String>,
    pub url: String,
    pub secure: bool,
}

impl StoredFile {
    /// Extension with a leading dot, derived from `extension` or the original filename.
    pub fn dotted_extension(&self) -> String {
        let ext = self
            .extension
            .clone()
            .filter(|e| !e.is_empty())
            .or_else(|| {
                self.original_filename
                    .rsplit_once('.')
                    .map(|(_, ext)| ext.to_string())
            });
        match ext {
            Some(ext) => format!(".{}", ext.to_lowercase()),
            None => String::new(),
        }
    }
}

/// A derived asset (thumbnail, resized copy) generated from a `StoredFile`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OptimizedImage {
    pub id: i64,
    pub upload_id: i64,
    pub url: String,
    pub width: i32,
    pub height: i32,
}
