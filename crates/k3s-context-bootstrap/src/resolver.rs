//! Role resolution and leaderless server election.
//!
//! Every device runs the same resolver against the same shared store. There
//! is no lock: agreement comes from two properties.
//!
//! 1. **Deterministic selection.** The server candidate is the online device
//!    with the smallest [`DeviceId`] that holds no role yet. Resolvers that
//!    see the same membership snapshot pick the same winner.
//! 2. **Idempotent writes.** Every write is an upsert, so two devices writing
//!    the same value to the same key is harmless.
//!
//! Once any device holds `server`, nobody elects again (first server wins).

use k3s_context_core::{Device, DeviceId, EnvVar, FleetId, Role, ROLE_VAR};
use k3s_context_fleet::{FleetApi, VarOwner, VarQuery};
use tracing::{debug, info, warn};

use crate::error::{BootstrapError, Result};

/// What the resolver did for a device that has no role yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionOutcome {
    /// No server existed; the given device was written as server.
    Elected(DeviceId),
    /// A server already exists; the fleet-wide agent default was ensured.
    ServerExists(DeviceId),
    /// The local device is offline and left the election to others.
    NotCandidate,
}

/// Role of the local device as observed this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// This device is the server; carries its own record for publishing.
    Server(Device),
    /// This device is an agent.
    Agent,
    /// No role is visible for this device yet.
    Unset(ElectionOutcome),
}

impl Resolution {
    /// The role this resolution stands for.
    #[must_use]
    pub const fn role(&self) -> Option<Role> {
        match self {
            Self::Server(_) => Some(Role::Server),
            Self::Agent => Some(Role::Agent),
            Self::Unset(_) => None,
        }
    }
}

/// Pick the server candidate: the online device with the smallest id.
///
/// Returns `None` if no device is online.
#[must_use]
pub fn elect<'a>(devices: impl IntoIterator<Item = &'a Device>) -> Option<DeviceId> {
    devices
        .into_iter()
        .filter(|d| d.is_online)
        .map(|d| d.id)
        .min()
}

/// Decides the local device's role and performs the writes needed to converge.
pub struct RoleResolver<'a, F: FleetApi + ?Sized> {
    api: &'a F,
    fleet_id: FleetId,
}

impl<'a, F: FleetApi + ?Sized> RoleResolver<'a, F> {
    /// Create a resolver for a fleet.
    #[must_use]
    pub const fn new(api: &'a F, fleet_id: FleetId) -> Self {
        Self { api, fleet_id }
    }

    /// Resolve the role of the device identified by `device_uuid`.
    ///
    /// A device-scoped role variable wins over the fleet-scoped default. If
    /// neither exists, the resolver runs the election step.
    ///
    /// # Errors
    ///
    /// - `LocalDeviceNotFound` if the device is not in the fleet
    /// - `NoOnlineCandidate` if a server must be elected but no device is online
    /// - `Transport` if any API request fails
    pub async fn resolve(&self, device_uuid: &str) -> Result<Resolution> {
        let devices = self.api.list_devices(self.fleet_id).await?;
        let local = devices
            .iter()
            .find(|d| d.uuid == device_uuid)
            .cloned()
            .ok_or_else(|| BootstrapError::LocalDeviceNotFound {
                uuid: device_uuid.to_string(),
                fleet_id: self.fleet_id,
            })?;

        match self.assigned_role(&local).await? {
            Some(Role::Server) => Ok(Resolution::Server(local)),
            Some(Role::Agent) => Ok(Resolution::Agent),
            None => self.elect_server(&devices, &local).await.map(Resolution::Unset),
        }
    }

    /// Role visible to `local`: its own variable, else the fleet default.
    async fn assigned_role(&self, local: &Device) -> Result<Option<Role>> {
        let own = self
            .api
            .list_vars(&VarQuery::new(VarOwner::Device(local.id), ROLE_VAR))
            .await?;
        if let Some(role) = first_role(&own) {
            return Ok(Some(role));
        }

        let fleet = self
            .api
            .list_vars(&VarQuery::new(VarOwner::Fleet(self.fleet_id), ROLE_VAR))
            .await?;
        Ok(first_role(&fleet))
    }

    async fn elect_server(&self, devices: &[Device], local: &Device) -> Result<ElectionOutcome> {
        let role_vars = self
            .api
            .list_vars(&VarQuery::devices(devices.iter().map(|d| d.id), ROLE_VAR))
            .await?;

        let existing = role_vars
            .iter()
            .filter(|v| matches!(v.role(), Ok(Role::Server)))
            .filter_map(|v| v.device)
            .min();

        if let Some(server) = existing {
            info!(server = %server, "Server already assigned, ensuring fleet agent default");
            self.api
                .upsert_var(VarOwner::Fleet(self.fleet_id), ROLE_VAR, Role::Agent.as_str())
                .await?;
            return Ok(ElectionOutcome::ServerExists(server));
        }

        // Devices that already hold a role are not candidates.
        let assigned: Vec<DeviceId> = role_vars
            .iter()
            .filter(|v| v.role().is_ok())
            .filter_map(|v| v.device)
            .collect();
        let candidates = devices.iter().filter(|d| !assigned.contains(&d.id));

        let Some(winner) = elect(candidates) else {
            return Err(BootstrapError::NoOnlineCandidate(self.fleet_id));
        };

        if !local.is_online {
            debug!(device = %local.id, winner = %winner, "Local device offline, not electing");
            return Ok(ElectionOutcome::NotCandidate);
        }

        info!(winner = %winner, local = %local.id, "Electing server");
        self.api
            .upsert_var(VarOwner::Device(winner), ROLE_VAR, Role::Server.as_str())
            .await?;
        Ok(ElectionOutcome::Elected(winner))
    }
}

/// Role held by the first variable; extra matches are ignored.
fn first_role(vars: &[EnvVar]) -> Option<Role> {
    let var = vars.first()?;
    match var.role() {
        Ok(role) => Some(role),
        Err(e) => {
            warn!(var_id = %var.id, error = %e, "Ignoring unrecognized role");
            None
        }
    }
}
