//! k3s-context - k3s server election and join publishing for a device fleet.
//!
//! Runs one convergence loop for the lifetime of the process. Any error ends
//! the process with a non-zero status; the fleet supervisor restarts it and
//! the loop resumes from the state held in the fleet-management API.

use std::sync::Arc;

use k3s_context_bootstrap::{BootstrapConfig, ConvergenceLoop};
use k3s_context_fleet::HttpFleetClient;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,k3s_context=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting k3s-context");

    let config = BootstrapConfig::from_env();
    tracing::info!(
        fleet_id = ?config.fleet_id,
        device_uuid = ?config.device_uuid,
        api_root = %config.api_root,
        token_path = %config.token_path.display(),
        "Loaded bootstrap configuration"
    );

    // The loop never calls the API without a credential.
    let client = HttpFleetClient::new(
        config.api_root.clone(),
        config.api_key.clone().unwrap_or_default(),
    );

    let mut bootstrap = ConvergenceLoop::new(config, Arc::new(client));
    bootstrap.run().await?;

    Ok(())
}
