//! Configuration module
//!
//! Configuration is loaded from the environment once, validated, and then passed into
//! constructors explicitly. Nothing in the workspace reads settings from global state
//! after startup, so several stores or migration runs can coexist in one process.

use std::env;
use std::path::PathBuf;

use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_DB_NAME, DEFAULT_MIGRATION_CONCURRENCY,
    DEFAULT_RERENDER_BACKLOG_THRESHOLD,
};
use crate::error::ConfigError;
use crate::storage_types::StorageBackend;

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .to_lowercase()
        .parse()
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env_opt(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            key,
            reason: format!("cannot parse '{}'", raw),
        }),
        None => Ok(default),
    }
}

/// Remote bucket settings.
#[derive(Clone, Debug)]
pub struct S3Config {
    /// Bucket name, optionally followed by a folder: `name` or `name/folder/path`.
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible providers (MinIO, DigitalOcean Spaces, ...).
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Use the ambient instance identity instead of static credentials.
    pub use_iam_profile: bool,
    pub cdn_url: Option<String>,
}

impl S3Config {
    pub fn bucket_name(&self) -> &str {
        self.bucket
            .split_once('/')
            .map(|(name, _)| name)
            .unwrap_or(&self.bucket)
    }

    /// Folder inside the bucket every key is stored under, without slashes at the ends.
    pub fn bucket_folder(&self) -> Option<&str> {
        self.bucket
            .split_once('/')
            .map(|(_, folder)| folder.trim_matches('/'))
            .filter(|folder| !folder.is_empty())
    }

    /// Base URL objects are served from (without the folder).
    ///
    /// AWS uses `https://{bucket}.s3.{region}.amazonaws.com`; S3-compatible providers use
    /// path-style addressing on the custom endpoint: `{endpoint}/{bucket}`.
    pub fn base_url(&self) -> String {
        match self.endpoint {
            Some(ref endpoint) => {
                format!("{}/{}", endpoint.trim_end_matches('/'), self.bucket_name())
            }
            None => format!(
                "https://{}.s3.{}.amazonaws.com",
                self.bucket_name(),
                self.region
            ),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket_name().is_empty() {
            return Err(ConfigError::Missing("S3_BUCKET"));
        }
        if self.region.is_empty() {
            return Err(ConfigError::Missing("S3_REGION or AWS_REGION"));
        }
        if !self.use_iam_profile
            && (self.access_key_id.is_none() || self.secret_access_key.is_none())
        {
            return Err(ConfigError::Missing(
                "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY (or S3_USE_IAM_PROFILE=true)",
            ));
        }
        if let Some(ref endpoint) = self.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(ConfigError::Invalid {
                    key: "S3_ENDPOINT",
                    reason: "must start with http:// or https://".to_string(),
                });
            }
        }
        Ok(())
    }

    fn from_env() -> Option<Self> {
        let bucket = env_opt("S3_BUCKET")?;
        Some(S3Config {
            bucket: bucket.to_lowercase(),
            region: env_opt("S3_REGION")
                .or_else(|| env_opt("AWS_REGION"))
                .unwrap_or_default(),
            endpoint: env_opt("S3_ENDPOINT"),
            access_key_id: env_opt("AWS_ACCESS_KEY_ID"),
            secret_access_key: env_opt("AWS_SECRET_ACCESS_KEY"),
            use_iam_profile: env_bool("S3_USE_IAM_PROFILE", false),
            cdn_url: env_opt("S3_CDN_URL").map(|u| u.trim_end_matches('/').to_string()),
        })
    }
}

/// Upload storage configuration.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    /// Backend new uploads are written to.
    pub backend: StorageBackend,
    /// Public directory; local uploads live under `{public_dir}/uploads/{db_name}`.
    pub public_dir: PathBuf,
    /// Origin the application serves local uploads from, e.g. `https://forum.example.com`.
    pub base_url: String,
    /// Optional CDN origin in front of local uploads.
    pub cdn_url: Option<String>,
    pub db_name: String,
    pub s3: Option<S3Config>,
}

impl StorageConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend = match env_opt("STORAGE_BACKEND") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: "STORAGE_BACKEND",
                reason: format!("unknown backend '{}'", raw),
            })?,
            None => StorageBackend::Local,
        };

        let config = StorageConfig {
            backend,
            public_dir: env_opt("LOCAL_STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("public")),
            base_url: env_opt("LOCAL_STORAGE_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .ok_or(ConfigError::Missing("LOCAL_STORAGE_BASE_URL"))?,
            cdn_url: env_opt("CDN_URL").map(|u| u.trim_end_matches('/').to_string()),
            db_name: env_opt("SITE_DB_NAME").unwrap_or_else(|| DEFAULT_DB_NAME.to_string()),
            s3: S3Config::from_env(),
        };

        config.validate()?;
        Ok(config)
    }

    /// The S3 section, required by anything that talks to the bucket.
    pub fn require_s3(&self) -> Result<&S3Config, ConfigError> {
        let s3 = self.s3.as_ref().ok_or(ConfigError::Missing("S3_BUCKET"))?;
        s3.validate()?;
        Ok(s3)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.db_name.is_empty() || self.db_name.contains('/') {
            return Err(ConfigError::Invalid {
                key: "SITE_DB_NAME",
                reason: "must be a non-empty name without '/'".to_string(),
            });
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                key: "LOCAL_STORAGE_BASE_URL",
                reason: "must start with http:// or https://".to_string(),
            });
        }

        match self.backend {
            StorageBackend::S3 => {
                self.require_s3()?;
            }
            StorageBackend::Local => {
                if self.public_dir.as_os_str().is_empty() {
                    return Err(ConfigError::Missing("LOCAL_STORAGE_PATH"));
                }
            }
        }

        if let Some(ref s3) = self.s3 {
            // URL ownership must be decidable by prefix alone.
            let remote = [Some(s3.base_url()), s3.cdn_url.clone()];
            let local = [Some(self.base_url.clone()), self.cdn_url.clone()];
            for r in remote.iter().flatten() {
                for l in local.iter().flatten() {
                    if r.starts_with(l.as_str()) || l.starts_with(r.as_str()) {
                        return Err(ConfigError::Invalid {
                            key: "S3_BUCKET",
                            reason: format!(
                                "remote URL {} overlaps local URL {}",
                                r, l
                            ),
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

/// Migration engine settings.
#[derive(Clone, Debug)]
pub struct MigrationConfig {
    /// Number of upload workers.
    pub concurrency: usize,
    /// Compute and log every planned action without transferring bytes or rewriting.
    pub dry_run: bool,
    /// Store objects under `uploads/{db}/` so several sites can share one bucket.
    pub tenant_scoped: bool,
    /// Page size used when scanning uploads and documents.
    pub batch_size: i64,
    /// Documents still waiting for a re-render that verification tolerates.
    pub rerender_backlog_threshold: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_MIGRATION_CONCURRENCY,
            dry_run: false,
            tenant_scoped: false,
            batch_size: DEFAULT_BATCH_SIZE,
            rerender_backlog_threshold: DEFAULT_RERENDER_BACKLOG_THRESHOLD,
        }
    }
}

impl MigrationConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = MigrationConfig {
            concurrency: env_parse("MIGRATION_CONCURRENCY", DEFAULT_MIGRATION_CONCURRENCY)?,
            dry_run: env_bool("MIGRATION_DRY_RUN", false),
            tenant_scoped: env_bool("MIGRATE_TO_MULTISITE", false),
            batch_size: env_parse("MIGRATION_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            rerender_backlog_threshold: env_parse(
                "RERENDER_BACKLOG_THRESHOLD",
                DEFAULT_RERENDER_BACKLOG_THRESHOLD,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "MIGRATION_CONCURRENCY",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.batch_size <= 0 {
            return Err(ConfigError::Invalid {
                key: "MIGRATION_BATCH_SIZE",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s3() -> S3Config {
        S3Config {
            bucket: "forum-uploads".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: Some("key".to_string()),
            secret_access_key: Some("secret".to_string()),
            use_iam_profile: false,
            cdn_url: None,
        }
    }

    fn storage() -> StorageConfig {
        StorageConfig {
            backend: StorageBackend::Local,
            public_dir: PathBuf::from("/var/www/public"),
            base_url: "https://forum.example.com".to_string(),
            cdn_url: None,
            db_name: "default".to_string(),
            s3: Some(s3()),
        }
    }

    #[test]
    fn bucket_folder_is_split_from_name() {
        let mut cfg = s3();
        cfg.bucket = "forum-uploads/site/a/".to_string();
        assert_eq!(cfg.bucket_name(), "forum-uploads");
        assert_eq!(cfg.bucket_folder(), Some("site/a"));
        assert_eq!(s3().bucket_folder(), None);
    }

    #[test]
    fn base_url_uses_virtual_host_style_on_aws() {
        assert_eq!(
            s3().base_url(),
            "https://forum-uploads.s3.us-east-1.amazonaws.com"
        );
    }

    #[test]
    fn base_url_uses_path_style_on_custom_endpoint() {
        let mut cfg = s3();
        cfg.endpoint = Some("http://localhost:9000/".to_string());
        assert_eq!(cfg.base_url(), "http://localhost:9000/forum-uploads");
    }

    #[test]
    fn credentials_are_required_without_iam_profile() {
        let mut cfg = s3();
        cfg.secret_access_key = None;
        assert!(matches!(cfg.validate(), Err(ConfigError::Missing(_))));
        cfg.use_iam_profile = true;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn missing_region_is_a_config_error() {
        let mut cfg = s3();
        cfg.region = String::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn s3_backend_requires_s3_section() {
        let mut cfg = storage();
        cfg.backend = StorageBackend::S3;
        cfg.s3 = None;
        assert_eq!(cfg.validate(), Err(ConfigError::Missing("S3_BUCKET")));
    }

    #[test]
    fn overlapping_local_and_remote_urls_are_rejected() {
        let mut cfg = storage();
        cfg.base_url = "http://localhost:9000".to_string();
        let mut remote = s3();
        remote.endpoint = Some("http://localhost:9000".to_string());
        cfg.s3 = Some(remote);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { key: "S3_BUCKET", .. })
        ));
    }

    #[test]
    fn valid_storage_config_passes() {
        assert!(storage().validate().is_ok());
    }

    #[test]
    fn migration_config_rejects_zero_concurrency() {
        let cfg = MigrationConfig {
            concurrency: 0,
            ..MigrationConfig::default()
        };
        assert!(cfg.validate().is_err());
        assert!(MigrationConfig::default().validate().is_ok());
        assert_eq!(MigrationConfig::default().concurrency, 20);
    }
}
