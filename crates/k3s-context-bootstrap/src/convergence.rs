//! The convergence loop.
//!
//! One cycle reads the shared store, decides, writes corrections, and picks
//! how long to sleep. Cycles never overlap: the next one starts only after the
//! sleep completes.

use std::sync::Arc;
use std::time::Duration;

use k3s_context_core::{FleetId, Role};
use k3s_context_fleet::FleetApi;
use tracing::{debug, error, info};

use crate::config::{BootstrapConfig, DisabledReason, Mode};
use crate::error::Result;
use crate::publisher::{PublishOutcome, Publisher};
use crate::resolver::{Resolution, RoleResolver};

/// Process-local state; rebuilt from the store after a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergenceState {
    /// Role observed in the last cycle.
    pub role: Option<Role>,
    /// Interval chosen by the last cycle.
    pub interval: Duration,
}

/// Drives role resolution and publishing on an adaptive timer.
pub struct ConvergenceLoop<F: FleetApi + ?Sized> {
    config: BootstrapConfig,
    api: Arc<F>,
    state: ConvergenceState,
}

impl<F: FleetApi + ?Sized> ConvergenceLoop<F> {
    /// Create a loop. The API is never called while the config is disabled.
    #[must_use]
    pub fn new(config: BootstrapConfig, api: Arc<F>) -> Self {
        let state = ConvergenceState {
            role: None,
            interval: config.idle_interval,
        };
        Self { config, api, state }
    }

    /// State left by the last cycle.
    #[must_use]
    pub const fn state(&self) -> ConvergenceState {
        self.state
    }

    /// Run forever. Returns only with the error that ended a cycle.
    ///
    /// # Errors
    ///
    /// Returns the first cycle error; the caller is expected to exit and let
    /// the supervisor restart the process.
    pub async fn run(&mut self) -> Result<()> {
        info!("Entering convergence loop");
        loop {
            let interval = self.run_cycle().await?;
            debug!(seconds = interval.as_secs(), "Sleeping until next cycle");
            tokio::time::sleep(interval).await;
        }
    }

    /// Run a single cycle and return how long to sleep before the next one.
    ///
    /// # Errors
    ///
    /// Returns an error if resolution or publishing fails.
    pub async fn run_cycle(&mut self) -> Result<Duration> {
        let (fleet_id, device_uuid) = match self.config.mode() {
            Mode::Enabled {
                fleet_id,
                device_uuid,
            } => (fleet_id, device_uuid.to_string()),
            Mode::Disabled(reason) => {
                log_disabled(reason);
                self.state.interval = self.config.idle_interval;
                return Ok(self.state.interval);
            }
        };

        match self.converge(fleet_id, &device_uuid).await {
            Ok(interval) => Ok(interval),
            Err(e) => {
                error!(
                    error = %e,
                    retriable = e.is_retriable(),
                    device_uuid = %device_uuid,
                    "Convergence cycle failed"
                );
                Err(e)
            }
        }
    }

    async fn converge(&mut self, fleet_id: FleetId, device_uuid: &str) -> Result<Duration> {
        debug!(fleet_id = %fleet_id, "Checking if bootstrap can continue");
        let resolution = RoleResolver::new(self.api.as_ref(), fleet_id)
            .resolve(device_uuid)
            .await?;

        let role = resolution.role();
        if role != self.state.role {
            info!(from = ?self.state.role, to = ?role, "Role changed");
        }

        let interval = match resolution {
            Resolution::Server(device) => {
                let publisher =
                    Publisher::new(self.api.as_ref(), fleet_id, &self.config.token_path);
                match publisher.publish(&device).await? {
                    PublishOutcome::Published => self.config.heartbeat_interval,
                    PublishOutcome::TokenPending => self.config.retry_interval,
                }
            }
            Resolution::Agent => self.config.heartbeat_interval,
            Resolution::Unset(outcome) => {
                debug!(?outcome, "Role not yet assigned");
                self.config.retry_interval
            }
        };

        self.state = ConvergenceState { role, interval };
        Ok(interval)
    }
}

fn log_disabled(reason: DisabledReason) {
    match reason {
        DisabledReason::MissingCredential => {
            info!("No bootstrap credential detected, idling");
        }
        DisabledReason::LocalDevelopment => {
            error!("Contextualization is not supported in local development mode");
        }
        DisabledReason::MissingIdentity => {
            error!("Fleet id or device UUID not configured, idling");
        }
    }
}
