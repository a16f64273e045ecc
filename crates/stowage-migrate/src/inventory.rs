use std::collections::HashMap;
use stowage_storage::{LocalObject, LocalStore, S3Store, StorageResult};

/// What exists on each side before anything is transferred.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub local: Vec<LocalObject>,
    /// Remote objects keyed by path relative to the key prefix, with their sizes.
    pub remote: HashMap<String, u64>,
}

/// Local files split by whether the bucket already holds them.
#[derive(Debug, Clone, Default)]
pub struct UploadPlan {
    pub synced: Vec<LocalObject>,
    pub to_upload: Vec<LocalObject>,
}

impl Inventory {
    pub async fn collect(local: &LocalStore, remote: &S3Store) -> StorageResult<Self> {
        let local_objects = local.inventory().await?;
        let remote_objects = remote.inventory().await?;

        tracing::info!(
            local = local_objects.len(),
            remote = remote_objects.len(),
            "Inventory collected"
        );

        Ok(Self {
            local: local_objects,
            remote: remote_objects,
        })
    }

    /// A file counts as synced when an object with the same path and the same byte
    /// size exists remotely. Contents are not compared.
    pub fn classify(&self) -> UploadPlan {
        let (synced, to_upload) = self
            .local
            .iter()
            .cloned()
            .partition(|object| self.remote.get(&object.path) == Some(&object.size));
        UploadPlan { synced, to_upload }
    }
}
