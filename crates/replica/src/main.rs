// Host harness for the table synchronization engine
// Runs a simulated table session and checks that every replica converges

mod config;
mod messages;
mod op_log;
mod replica;
mod session;
mod simulation;

use anyhow::{bail, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,replica=debug,tablesync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Configuration
    let config = config::SimulationConfig::from_env()?;
    tracing::info!("Simulation settings: {:?}", config);

    let report = simulation::run(&config).await?;

    tracing::info!(
        "Table {}: {} replicas, {} operations, {} duplicate frames ignored, {} rejected",
        report.session_id,
        report.replicas,
        report.operations,
        report.duplicates_ignored,
        report.rejected
    );

    if !report.converged {
        bail!("Replicas of table {} diverged", report.session_id);
    }

    if let Some(snapshot) = &report.snapshot {
        tracing::info!(
            "Converged: phase {:?}, actor {} to act, {} entities, {} removed",
            snapshot.phase,
            snapshot.active_actor,
            snapshot.entities.len(),
            snapshot.tombstones.len()
        );
    }

    Ok(())
}
