//! Publishing the join descriptor from the server device.
//!
//! Agents need two things to join: the server's URL and the cluster join
//! token. The server republishes both every cycle, since its address may
//! change and the token file only appears once k3s has initialized.

use std::io;
use std::path::Path;

use k3s_context_core::{Device, FleetId, Role, K3S_SERVER_PORT, ROLE_VAR, TOKEN_VAR, URL_VAR};
use k3s_context_fleet::{FleetApi, VarOwner};
use tracing::{debug, info};

use crate::error::{BootstrapError, Result};

/// Result of a publishing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// URL, fleet default role and join token are all in place.
    Published,
    /// URL and fleet default role are in place; the token file is not ready.
    TokenPending,
}

/// Join URL for a server reachable at `address`.
#[must_use]
pub fn join_url(address: &str) -> String {
    if address.contains(':') {
        format!("https://[{address}]:{K3S_SERVER_PORT}")
    } else {
        format!("https://{address}:{K3S_SERVER_PORT}")
    }
}

/// Read the join token, trimmed of surrounding whitespace.
///
/// # Errors
///
/// Returns the I/O error if the file cannot be read. A file that exists but
/// is blank reads as `NotFound`, since k3s has not finished writing it.
pub async fn read_join_token(path: &Path) -> io::Result<String> {
    let contents = tokio::fs::read_to_string(path).await?;
    let token = contents.trim();
    if token.is_empty() {
        return Err(io::Error::new(io::ErrorKind::NotFound, "join token file is empty"));
    }
    Ok(token.to_string())
}

/// Publishes the join descriptor into the fleet-scoped namespace.
pub struct Publisher<'a, F: FleetApi + ?Sized> {
    api: &'a F,
    fleet_id: FleetId,
    token_path: &'a Path,
}

impl<'a, F: FleetApi + ?Sized> Publisher<'a, F> {
    /// Create a publisher for a fleet, reading the token from `token_path`.
    #[must_use]
    pub const fn new(api: &'a F, fleet_id: FleetId, token_path: &'a Path) -> Self {
        Self {
            api,
            fleet_id,
            token_path,
        }
    }

    /// Publish the join URL, the fleet agent default, and the join token.
    ///
    /// Must only be called for the device that holds the server role.
    ///
    /// # Errors
    ///
    /// - `NoLocalAddress` if the device has no address
    /// - `Transport` if any API request fails
    pub async fn publish(&self, server: &Device) -> Result<PublishOutcome> {
        let address = server
            .primary_address()
            .ok_or(BootstrapError::NoLocalAddress(server.id))?;
        let fleet = VarOwner::Fleet(self.fleet_id);

        let url = join_url(address);
        self.api.upsert_var(fleet, URL_VAR, &url).await?;
        self.api
            .upsert_var(fleet, ROLE_VAR, Role::Agent.as_str())
            .await?;

        match read_join_token(self.token_path).await {
            Ok(token) => {
                let outcome = self.api.upsert_var(fleet, TOKEN_VAR, &token).await?;
                if outcome.wrote() {
                    info!(url = %url, "Published join descriptor");
                } else {
                    debug!(url = %url, "Join descriptor unchanged");
                }
                Ok(PublishOutcome::Published)
            }
            Err(e) => {
                info!(
                    path = %self.token_path.display(),
                    reason = %e,
                    "Waiting for node join token to appear"
                );
                Ok(PublishOutcome::TokenPending)
            }
        }
    }
}
