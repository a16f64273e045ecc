use std::path::{Path, PathBuf};
use tokio::fs;

/// A regular file found under a directory tree.
#[derive(Debug, Clone)]
pub(crate) struct WalkEntry {
    pub path: PathBuf,
    pub metadata: std::fs::Metadata,
}

/// List every regular file below `root`. Symlinks are not followed.
///
/// A missing root yields an empty list.
pub(crate) async fn walk_files(root: &Path) -> std::io::Result<Vec<WalkEntry>> {
    let mut files = Vec::new();
    if !fs::try_exists(root).await.unwrap_or(false) {
        return Ok(files);
    }

    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                let metadata = entry.metadata().await?;
                files.push(WalkEntry {
                    path: entry.path(),
                    metadata,
                });
            }
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// `path` relative to `root`, joined with `/`.
pub(crate) fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn walks_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("original/2X/a");
        fs::create_dir_all(&nested).await.unwrap();
        fs::write(dir.path().join("top.txt"), b"1").await.unwrap();
        fs::write(nested.join("deep.png"), b"22").await.unwrap();

        let files = walk_files(dir.path()).await.unwrap();
        let keys: Vec<String> = files
            .iter()
            .filter_map(|f| relative_key(dir.path(), &f.path))
            .collect();
        assert_eq!(keys, vec!["original/2X/a/deep.png", "top.txt"]);
        assert_eq!(files[0].metadata.len(), 2);
    }

    #[tokio::test]
    async fn missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let files = walk_files(&dir.path().join("nope")).await.unwrap();
        assert!(files.is_empty());
    }
}
