//! Warden bootstrap - applies the policy schema and seeds the platform.
//!
//! Reads `WARDEN_CONFIG` (a config file path) when set, otherwise only
//! `WARDEN__*` environment variables.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use warden_core::{bootstrap::Bootstrapper, config::WardenConfig, db::Database, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = match std::env::var("WARDEN_CONFIG") {
        Ok(path) => WardenConfig::from_file(&path)?,
        Err(_) => WardenConfig::load().unwrap_or_else(|e| {
            eprintln!("Warning: Could not load config: {}. Using defaults.", e);
            WardenConfig::default()
        }),
    };

    telemetry::init_telemetry(&config.logging, &config.environment)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Warden bootstrap");

    // Reject bad namespace configuration before touching the database
    config.namespace_policy()?;

    let db = Database::new(&config.database).await?;
    db.migrate().await?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; rolling back bootstrap");
            shutdown.cancel();
        }
    });

    let bootstrapper = Bootstrapper::new(Arc::new(db), config.operation_guard());
    let report = bootstrapper
        .bootstrap_system(&cancel, &config.bootstrap.capabilities)
        .await?;

    tracing::info!(
        capabilities = report.capabilities_registered,
        permissions = report.permissions_created,
        roles = report.roles_created,
        grants = report.grants_added,
        "Warden bootstrap finished"
    );
    Ok(())
}
