use crate::content::{
    checksum, content_disposition, content_type_for, is_inline_image, CACHE_CONTROL,
    PRIVATE_CACHE_CONTROL,
};
use crate::keys::{strip_query, tenant_prefix, validate_key, ORIGINAL_DIR};
use crate::lifecycle::{LifecyclePolicy, S3LifecycleRule};
use crate::tombstone::{BucketTombstone, PurgeOutcome, Tombstone};
use crate::traits::{FileStore, StorageError, StorageResult, StoreOptions};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http::Method;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::Error as ObjectStoreError;
use object_store::{
    Attribute, Attributes, ObjectStoreExt, PutOptions, PutPayload, Result as ObjectResult,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use stowage_core::constants::SECURE_URL_TTL_SECS;
use stowage_core::models::StoredFile;
use stowage_core::S3Config;

fn strip_scheme(origin: &str) -> &str {
    origin
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(origin)
}

/// Listed keys come back percent-encoded; local paths are raw.
fn decoded_key(location: &Path) -> String {
    let raw = location.to_string();
    match urlencoding::decode(&raw) {
        Ok(key) => key.into_owned(),
        Err(_) => raw,
    }
}

/// Where a site's uploads live inside the bucket and how they are addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    bucket: String,
    base_url: String,
    cdn_url: Option<String>,
    key_prefix: String,
    tombstone_prefix: String,
}

impl S3Location {
    pub fn from_config(config: &S3Config, db_name: &str, tenant_scoped: bool) -> Self {
        let folder = config
            .bucket_folder()
            .map(|f| format!("{}/", f))
            .unwrap_or_default();
        let tombstone = if tenant_scoped {
            format!("uploads/tombstone/{}/", db_name)
        } else {
            "tombstone/".to_string()
        };

        S3Location {
            bucket: config.bucket_name().to_string(),
            base_url: config.base_url(),
            cdn_url: config.cdn_url.clone(),
            key_prefix: format!("{}{}", folder, tenant_prefix(db_name, tenant_scoped)),
            tombstone_prefix: format!("{}{}", folder, tombstone),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn cdn_url(&self) -> Option<&str> {
        self.cdn_url.as_deref()
    }

    /// Prefix prepended to every relative path: `[{folder}/][uploads/{db}/]`.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn tombstone_prefix(&self) -> &str {
        &self.tombstone_prefix
    }

    pub fn object_key(&self, path: &str) -> String {
        format!("{}{}", self.key_prefix, path)
    }

    pub fn url_for_path(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, self.object_key(path))
    }

    /// `{base}/{key_prefix}original/`, the prefix every migrated original shares.
    pub fn original_url_prefix(&self) -> String {
        self.url_for_path(&format!("{}/", ORIGINAL_DIR))
    }

    /// Relative path for a URL pointing into this location.
    pub fn path_from_url(&self, url: &str) -> Option<String> {
        let url = strip_query(url);
        let origins = std::iter::once(self.base_url.as_str()).chain(self.cdn_url.as_deref());

        let mut rest = None;
        for origin in origins {
            let candidate = match url.strip_prefix("//") {
                Some(host_path) => host_path.strip_prefix(strip_scheme(origin)),
                None => url.strip_prefix(origin),
            };
            if candidate.is_some() {
                rest = candidate;
                break;
            }
        }

        let relative = rest?
            .strip_prefix('/')?
            .strip_prefix(self.key_prefix.as_str())?;
        validate_key(relative).ok()?;
        Some(relative.to_string())
    }
}

/// S3 storage implementation
#[derive(Clone)]
pub struct S3Store {
    store: Arc<dyn object_store::ObjectStore>,
    signer: Option<Arc<dyn Signer>>,
    location: S3Location,
    tombstone: BucketTombstone,
}

impl S3Store {
    /// Create a new S3Store instance
    ///
    /// # Arguments
    /// * `config` - Bucket, region, endpoint and credentials
    /// * `db_name` - Site database name
    /// * `tenant_scoped` - Store keys under `uploads/{db}/` so sites can share a bucket
    pub async fn new(config: &S3Config, db_name: &str, tenant_scoped: bool) -> StorageResult<Self> {
        config.validate()?;

        // Build AmazonS3 object store from environment and explicit settings.
        let mut builder = AmazonS3Builder::from_env()
            .with_region(config.region.clone())
            .with_bucket_name(config.bucket_name());

        if !config.use_iam_profile {
            if let (Some(key), Some(secret)) = (&config.access_key_id, &config.secret_access_key)
            {
                builder = builder
                    .with_access_key_id(key.clone())
                    .with_secret_access_key(secret.clone());
            }
        }

        if let Some(ref endpoint) = config.endpoint {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        let s3 = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        let lifecycle = S3LifecycleRule::new(config).await?;

        Ok(Self::with_object_store(
            Arc::new(s3.clone()),
            Some(Arc::new(s3)),
            S3Location::from_config(config, db_name, tenant_scoped),
            Arc::new(lifecycle),
        ))
    }

    /// Assemble a store from parts. Tests use this with an in-memory object store.
    pub fn with_object_store(
        store: Arc<dyn object_store::ObjectStore>,
        signer: Option<Arc<dyn Signer>>,
        location: S3Location,
        lifecycle: Arc<dyn LifecyclePolicy>,
    ) -> Self {
        let tombstone = BucketTombstone::new(
            store.clone(),
            location.key_prefix(),
            location.tombstone_prefix(),
            lifecycle,
        );
        Self {
            store,
            signer,
            location,
            tombstone,
        }
    }

    pub fn location(&self) -> &S3Location {
        &self.location
    }

    /// Size of the object at relative `path`, or `None` when it does not exist.
    pub async fn object_size(&self, path: &str) -> StorageResult<Option<u64>> {
        let key = self.location.object_key(path);
        let location = Path::from(key.clone());

        match self.store.head(&location).await {
            Ok(meta) => Ok(Some(meta.size as u64)),
            Err(ObjectStoreError::NotFound { .. }) => Ok(None),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %self.location.bucket,
                    key = %key,
                    "S3 head failed"
                );
                Err(StorageError::BackendError(e.to_string()))
            }
        }
    }

    /// Every object under the key prefix, keyed by relative path, with its size.
    /// Tombstoned objects are excluded.
    pub async fn inventory(&self) -> StorageResult<HashMap<String, u64>> {
        let start = std::time::Instant::now();
        let key_prefix = self.location.key_prefix();
        let prefix_path = Path::from(key_prefix.trim_end_matches('/'));
        let prefix = if key_prefix.is_empty() {
            None
        } else {
            Some(&prefix_path)
        };

        let mut listing = object_store::ObjectStore::list(self.store.as_ref(), prefix);
        let mut objects = HashMap::new();

        while let Some(item) = listing.next().await {
            let meta = item.map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.location.bucket,
                    prefix = %key_prefix,
                    "S3 list failed"
                );
                StorageError::BackendError(e.to_string())
            })?;

            let key = decoded_key(&meta.location);
            if key.starts_with(self.location.tombstone_prefix()) {
                continue;
            }
            if let Some(relative) = key.strip_prefix(key_prefix) {
                objects.insert(relative.to_string(), meta.size as u64);
            }
        }

        tracing::info!(
            bucket = %self.location.bucket,
            prefix = %key_prefix,
            objects = objects.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 inventory complete"
        );
        Ok(objects)
    }

    /// Presigned GET URL for a secure upload.
    pub async fn signed_url(&self, url: &str, expires_in: Duration) -> StorageResult<String> {
        let signer = self.signer.as_ref().ok_or_else(|| {
            StorageError::ConfigError("URL signing is not available for this store".to_string())
        })?;
        let path = self
            .location
            .path_from_url(url)
            .ok_or_else(|| StorageError::NotFound(url.to_string()))?;
        let location = Path::from(self.location.object_key(&path));

        let signed = signer
            .signed_url(Method::GET, &location, expires_in)
            .await
            .map_err(|e| StorageError::BackendError(e.to_string()))?;
        Ok(signed.to_string())
    }

    fn attributes_for(&self, data: &[u8], path: &str, options: &StoreOptions) -> Attributes {
        let name = options.filename.as_deref().unwrap_or(path);
        let content_type = options
            .content_type
            .clone()
            .unwrap_or_else(|| content_type_for(name));
        let sha = options.checksum.clone().unwrap_or_else(|| checksum(data));

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.into());
        let cache_control = if options.secure {
            PRIVATE_CACHE_CONTROL
        } else {
            CACHE_CONTROL
        };
        attributes.insert(Attribute::CacheControl, cache_control.into());
        attributes.insert(Attribute::Metadata("sha256".into()), sha.into());
        if let Some(ref filename) = options.filename {
            if !is_inline_image(filename) {
                attributes.insert(
                    Attribute::ContentDisposition,
                    content_disposition(filename).into(),
                );
            }
        }
        attributes
    }
}

#[async_trait]
impl FileStore for S3Store {
    async fn store(
        &self,
        data: Bytes,
        path: &str,
        options: &StoreOptions,
    ) -> StorageResult<String> {
        validate_key(path)?;
        let key = self.location.object_key(path);
        let size = data.len() as u64;
        let location = Path::from(key.clone());

        let mut opts = PutOptions::default();
        opts.attributes = self.attributes_for(&data, path, options);

        let start = std::time::Instant::now();

        let result: ObjectResult<_> = object_store::ObjectStore::put_opts(
            self.store.as_ref(),
            &location,
            PutPayload::from(data),
            opts,
        )
        .await;

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.location.bucket,
                key = %key,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 upload failed"
            );
            StorageError::UploadFailed(e.to_string())
        })?;

        tracing::info!(
            bucket = %self.location.bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );

        Ok(self.location.url_for_path(path))
    }

    async fn remove(&self, url: &str) -> StorageResult<()> {
        let Some(path) = self.location.path_from_url(url) else {
            return Ok(());
        };

        self.tombstone.mark_removed(&path).await.map_err(|e| {
            tracing::warn!(
                error = %e,
                bucket = %self.location.bucket,
                url = %url,
                "S3 remove failed"
            );
            e
        })
    }

    async fn exists(&self, url: &str) -> bool {
        self.owns_url(url)
    }

    fn owns_url(&self, url: &str) -> bool {
        self.location.path_from_url(url).is_some()
    }

    fn resolve_public_url(&self, file: &StoredFile) -> String {
        if file.url.starts_with("//") {
            format!("https:{}", file.url)
        } else {
            file.url.clone()
        }
    }

    fn resolve_cdn_url(&self, url: &str) -> String {
        let Some(cdn) = self.location.cdn_url() else {
            return url.to_string();
        };
        let base = self.location.base_url();
        let scheme_relative = format!("//{}", strip_scheme(base));

        if let Some(rest) = url.strip_prefix(base) {
            format!("{}{}", cdn, rest)
        } else if let Some(rest) = url.strip_prefix(scheme_relative.as_str()) {
            format!("{}{}", cdn, rest)
        } else {
            url.to_string()
        }
    }

    async fn download_url(&self, file: &StoredFile) -> StorageResult<String> {
        let url = self.resolve_public_url(file);
        if file.secure {
            return self
                .signed_url(&url, Duration::from_secs(SECURE_URL_TTL_SECS))
                .await;
        }
        Ok(self.resolve_cdn_url(&url))
    }

    async fn purge_tombstone(&self, grace_period_days: u32) -> StorageResult<PurgeOutcome> {
        self.tombstone.purge_older_than(grace_period_days).await
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}
