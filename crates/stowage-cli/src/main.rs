//! Stowage CLI: move a site's uploads from local disk to an S3-compatible bucket.
//!
//! Reads configuration from the environment (a `.env` file is honoured). See
//! `stowage_core::config` for the variables.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use stowage_cli::{apply_overrides, init_tracing, print_json};
use stowage_core::{MigrationConfig, StorageConfig};
use stowage_db::{PgDocumentRepository, PgUploadRepository, UploadRepository};
use stowage_migrate::{MigrationEngine, Verifier};
use stowage_storage::{create_file_store, LocalStore, PurgeOutcome, S3Store};

#[derive(Parser)]
#[command(name = "stowage", about = "Upload storage maintenance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy local uploads to the bucket and rewrite every reference to them
    Migrate {
        /// Log planned actions without transferring bytes or rewriting records
        #[arg(long)]
        dry_run: bool,
        /// Number of concurrent uploads
        #[arg(long)]
        concurrency: Option<usize>,
        /// Store keys under uploads/{db}/ so several sites can share the bucket
        #[arg(long)]
        multisite: bool,
    },
    /// Count residual local references without changing anything
    Verify,
    /// Print the URL a client is sent to for an upload
    Url {
        /// Upload id
        id: i64,
        /// The active bucket uses tenant-scoped keys
        #[arg(long)]
        multisite: bool,
    },
    /// Permanently delete removed uploads older than the grace period
    PurgeTombstone {
        /// Days a removed upload stays recoverable
        #[arg(long, default_value = "30")]
        grace_period_days: u32,
        /// The active bucket uses tenant-scoped keys
        #[arg(long)]
        multisite: bool,
    },
}

async fn connect(max_connections: u32) -> anyhow::Result<PgPool> {
    let url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&url)
        .await
        .context("Failed to connect to database")?;
    Ok(pool)
}

async fn migrate(
    storage: &StorageConfig,
    config: MigrationConfig,
) -> anyhow::Result<()> {
    let s3 = storage.require_s3().context("Invalid configuration")?;
    let local = LocalStore::from_config(storage)
        .await
        .context("Failed to open local uploads")?;
    let remote = S3Store::new(s3, &storage.db_name, config.tenant_scoped)
        .await
        .context("Failed to open bucket")?;

    let pool = connect(config.concurrency as u32 + 2).await?;
    let engine = MigrationEngine::new(
        config,
        Arc::new(local),
        Arc::new(remote),
        Arc::new(PgUploadRepository::new(pool.clone())),
        Arc::new(PgDocumentRepository::new(pool)),
    )
    .context("Invalid configuration")?;

    // Ctrl-C stops new uploads; in-flight ones finish.
    let cancel = engine.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing in-flight uploads");
            cancel.cancel();
        }
    });

    match engine.run().await {
        Ok(report) => print_json(&report),
        Err(err) => {
            if let Some(report) = err.report() {
                print_json(report)?;
            }
            if err.is_configuration() {
                Err(err).context("Invalid configuration")
            } else {
                Err(err).context("Migration failed")
            }
        }
    }
}

async fn verify(storage: &StorageConfig, config: MigrationConfig) -> anyhow::Result<()> {
    let local = LocalStore::from_config(storage)
        .await
        .context("Failed to open local uploads")?;
    let pool = connect(2).await?;

    let report = Verifier::new(
        &local,
        Arc::new(PgUploadRepository::new(pool.clone())),
        Arc::new(PgDocumentRepository::new(pool)),
        config.rerender_backlog_threshold,
    )
    .run()
    .await
    .context("Verification failed")?;

    print_json(&report)?;
    if !report.passed {
        bail!("Residual local references remain");
    }
    Ok(())
}

async fn download_url(
    storage: &StorageConfig,
    id: i64,
    tenant_scoped: bool,
) -> anyhow::Result<()> {
    let store = create_file_store(storage, tenant_scoped)
        .await
        .context("Invalid configuration")?;
    let pool = connect(1).await?;
    let Some(file) = PgUploadRepository::new(pool)
        .get_upload(id)
        .await
        .context("Failed to load upload")?
    else {
        bail!("Upload {} not found", id);
    };

    let url = store
        .download_url(&file)
        .await
        .context("Failed to resolve upload URL")?;
    print_json(&serde_json::json!({ "id": file.id, "secure": file.secure, "url": url }))
}

async fn purge_tombstone(
    storage: &StorageConfig,
    grace_period_days: u32,
    tenant_scoped: bool,
) -> anyhow::Result<()> {
    let store = create_file_store(storage, tenant_scoped)
        .await
        .context("Invalid configuration")?;
    let outcome = store
        .purge_tombstone(grace_period_days)
        .await
        .context("Failed to purge tombstone")?;

    match outcome {
        PurgeOutcome::Swept { removed } => {
            print_json(&serde_json::json!({ "backend": store.backend_type(), "removed": removed }))
        }
        PurgeOutcome::Delegated => print_json(&serde_json::json!({
            "backend": store.backend_type(),
            "lifecycle_rule_days": grace_period_days,
        })),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let storage = StorageConfig::from_env().context("Invalid configuration")?;
    let config = MigrationConfig::from_env().context("Invalid configuration")?;

    match cli.command {
        Commands::Migrate {
            dry_run,
            concurrency,
            multisite,
        } => {
            let config = apply_overrides(config, dry_run, concurrency, multisite);
            migrate(&storage, config).await?;
        }
        Commands::Verify => verify(&storage, config).await?,
        Commands::Url { id, multisite } => {
            download_url(&storage, id, config.tenant_scoped || multisite).await?
        }
        Commands::PurgeTombstone {
            grace_period_days,
            multisite,
        } => {
            purge_tombstone(&storage, grace_period_days, config.tenant_scoped || multisite)
                .await?
        }
    }

    Ok(())
}
