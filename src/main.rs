//! PetCare index audit.
//!
//! Opens the configured document store, checks every denormalized index against the
//! entities it mirrors and exits non-zero if any disagree.

use std::process::ExitCode;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use petcare_backend::{open_store, Config, IndexAuditor};

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting PetCare index audit");
    tracing::info!("Database path: {:?}", config.db_path);

    let store = open_store(&config).await?;
    let revision = store.revision().await?;
    tracing::info!("Store revision: {}", revision);

    let findings = IndexAuditor::new(store).audit().await?;
    if findings.is_empty() {
        tracing::info!("All indices consistent");
        return Ok(ExitCode::SUCCESS);
    }

    for finding in &findings {
        tracing::warn!("{}", finding);
    }
    tracing::warn!("{} inconsistencies found", findings.len());
    Ok(ExitCode::FAILURE)
}
