//! Bucket lifecycle rules.
//!
//! Object stores expire tombstoned objects on their own once told to. `object_store`
//! has no API for bucket configuration, so this module talks to S3 through the AWS SDK.

use crate::traits::{StorageError, StorageResult};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::retry::{RetryConfig, RetryMode};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::types::{
    BucketLifecycleConfiguration, ExpirationStatus, LifecycleExpiration, LifecycleRule,
    LifecycleRuleFilter,
};
use aws_sdk_s3::Client;
use stowage_core::S3Config;

/// Identifier of the rule expiring the tombstone prefix.
pub const TOMBSTONE_RULE_ID: &str = "purge-tombstone";

/// Error code S3 answers with when a bucket has no lifecycle rules at all.
const NO_CONFIGURATION: &str = "NoSuchLifecycleConfiguration";

/// Only a bucket without any configuration reads as empty. The write that follows
/// replaces the whole rule set, so any other read failure aborts.
fn is_missing_configuration(code: Option<&str>) -> bool {
    code == Some(NO_CONFIGURATION)
}

/// Something that can expire every object under a prefix after `days`.
#[async_trait]
pub trait LifecyclePolicy: Send + Sync {
    async fn expire_prefix(&self, prefix: &str, days: u32) -> StorageResult<()>;
}

/// Maintains one expiration rule on an S3 bucket, leaving other rules untouched.
#[derive(Clone)]
pub struct S3LifecycleRule {
    client: Client,
    bucket: String,
}

impl S3LifecycleRule {
    pub async fn new(config: &S3Config) -> StorageResult<Self> {
        config.validate()?;

        let region_provider =
            RegionProviderChain::first_try(aws_config::Region::new(config.region.clone()));

        let retry_config = RetryConfig::standard()
            .with_max_attempts(5)
            .with_retry_mode(RetryMode::Adaptive);

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .retry_config(retry_config.clone());

        if !config.use_iam_profile {
            if let (Some(key), Some(secret)) = (&config.access_key_id, &config.secret_access_key)
            {
                loader = loader.credentials_provider(Credentials::new(
                    key.clone(),
                    secret.clone(),
                    None,
                    None,
                    "stowage",
                ));
            }
        }

        let sdk_config = loader.load().await;

        let client = if let Some(ref endpoint) = config.endpoint {
            let mut s3_config_builder = aws_sdk_s3::Config::builder()
                .endpoint_url(endpoint)
                .region(sdk_config.region().cloned())
                .retry_config(retry_config);
            if let Some(provider) = sdk_config.credentials_provider().into_iter().next() {
                s3_config_builder = s3_config_builder.credentials_provider(provider);
            }
            // MinIO and friends need path-style addressing.
            s3_config_builder = s3_config_builder.force_path_style(true);
            Client::from_conf(s3_config_builder.build())
        } else {
            Client::new(&sdk_config)
        };

        Ok(Self {
            client,
            bucket: config.bucket_name().to_string(),
        })
    }

    fn build_rule(prefix: &str, days: u32) -> StorageResult<LifecycleRule> {
        LifecycleRule::builder()
            .id(TOMBSTONE_RULE_ID)
            .status(ExpirationStatus::Enabled)
            .filter(LifecycleRuleFilter::builder().prefix(prefix).build())
            .expiration(
                LifecycleExpiration::builder()
                    .days(days.max(1) as i32)
                    .build(),
            )
            .build()
            .map_err(|e| StorageError::BackendError(e.to_string()))
    }
}

#[async_trait]
impl LifecyclePolicy for S3LifecycleRule {
    async fn expire_prefix(&self, prefix: &str, days: u32) -> StorageResult<()> {
        let existing = match self
            .client
            .get_bucket_lifecycle_configuration()
            .bucket(&self.bucket)
            .send()
            .await
        {
            Ok(out) => out.rules().to_vec(),
            Err(e) => {
                let service_err = e.into_service_error();
                if !is_missing_configuration(service_err.code()) {
                    tracing::error!(
                        error = %service_err,
                        bucket = %self.bucket,
                        "Failed to read lifecycle configuration"
                    );
                    return Err(StorageError::BackendError(service_err.to_string()));
                }
                tracing::debug!(bucket = %self.bucket, "No lifecycle configuration");
                Vec::new()
            }
        };

        let mut rules: Vec<LifecycleRule> = existing
            .into_iter()
            .filter(|rule| rule.id() != Some(TOMBSTONE_RULE_ID))
            .collect();
        rules.push(Self::build_rule(prefix, days)?);

        let configuration = BucketLifecycleConfiguration::builder()
            .set_rules(Some(rules))
            .build()
            .map_err(|e| StorageError::BackendError(e.to_string()))?;

        self.client
            .put_bucket_lifecycle_configuration()
            .bucket(&self.bucket)
            .lifecycle_configuration(configuration)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    prefix = %prefix,
                    "Failed to update lifecycle rule"
                );
                StorageError::BackendError(e.to_string())
            })?;

        tracing::info!(
            bucket = %self.bucket,
            prefix = %prefix,
            days = days,
            "Tombstone expiry delegated to bucket lifecycle"
        );
        Ok(())
    }
}
