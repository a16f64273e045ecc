use anyhow::Context;
use serde::Serialize;
use stowage_core::MigrationConfig;

/// Initialize tracing for CLI binaries.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

pub fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize report")?;
    println!("{}", out);
    Ok(())
}

/// Command-line flags win over the environment. Absent flags leave it untouched.
pub fn apply_overrides(
    mut config: MigrationConfig,
    dry_run: bool,
    concurrency: Option<usize>,
    multisite: bool,
) -> MigrationConfig {
    config.dry_run |= dry_run;
    config.tenant_scoped |= multisite;
    if let Some(concurrency) = concurrency {
        config.concurrency = concurrency;
    }
    config
}
