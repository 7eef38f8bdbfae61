//! In-memory fleet for tests.
//!
//! Behaves like the real API closely enough to run several resolvers against
//! one shared fleet: variables are unique per owner and name, creating a
//! duplicate fails with `409`, and every write is counted.

use async_trait::async_trait;
use k3s_context_core::{Device, DeviceId, EnvVar, FleetId, VarId};
use parking_lot::Mutex;

use crate::client::FleetApi;
use crate::error::{FleetError, Result};
use crate::query::{Scope, VarOwner, VarQuery};

/// A mock fleet-management API that stores devices and variables in memory.
#[derive(Default)]
pub struct MockFleetApi {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    devices: Vec<(FleetId, Device)>,
    vars: Vec<EnvVar>,
    next_var_id: u64,
    reads: usize,
    creates: usize,
    updates: usize,
    failure: Option<u16>,
}

impl MockState {
    fn check_failure(&self) -> Result<()> {
        match self.failure {
            Some(status) => Err(FleetError::Status {
                status,
                message: "injected failure".to_string(),
            }),
            None => Ok(()),
        }
    }

    fn find(&self, owner: VarOwner, name: &str) -> Option<&EnvVar> {
        let query = VarQuery::new(owner, name);
        self.vars.iter().find(|v| query.matches(v))
    }
}

impl MockFleetApi {
    /// Create an empty mock fleet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device to a fleet.
    pub fn add_device(&self, fleet_id: FleetId, device: Device) {
        self.state.lock().devices.push((fleet_id, device));
    }

    /// Set the liveness flag of a device.
    pub fn set_online(&self, device_id: DeviceId, online: bool) {
        let mut state = self.state.lock();
        for (_, device) in &mut state.devices {
            if device.id == device_id {
                device.is_online = online;
            }
        }
    }

    /// Change the address list of a device.
    pub fn set_ip_address(&self, device_id: DeviceId, ip_address: Option<&str>) {
        let mut state = self.state.lock();
        for (_, device) in &mut state.devices {
            if device.id == device_id {
                device.ip_address = ip_address.map(str::to_string);
            }
        }
    }

    /// Seed a variable directly, bypassing the write counters.
    pub fn seed_var(&self, owner: VarOwner, name: &str, value: &str) {
        let mut state = self.state.lock();
        state.next_var_id += 1;
        let id = VarId::new(state.next_var_id);
        state.vars.push(new_var(id, owner, name, value));
    }

    /// Remove a variable, as an operator deleting it by hand would.
    pub fn remove_var(&self, owner: VarOwner, name: &str) {
        let query = VarQuery::new(owner, name);
        self.state.lock().vars.retain(|v| !query.matches(v));
    }

    /// Value of a variable, if set.
    #[must_use]
    pub fn var(&self, owner: VarOwner, name: &str) -> Option<String> {
        self.state.lock().find(owner, name).map(|v| v.value.clone())
    }

    /// Every variable of a scope with the given name.
    #[must_use]
    pub fn vars_named(&self, scope: Scope, name: &str) -> Vec<EnvVar> {
        self.state
            .lock()
            .vars
            .iter()
            .filter(|v| v.name == name && var_scope(v) == scope)
            .cloned()
            .collect()
    }

    /// Make every subsequent request fail with the given status, or clear it.
    pub fn fail_requests(&self, status: Option<u16>) {
        self.state.lock().failure = status;
    }

    /// Number of list requests served.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.state.lock().reads
    }

    /// Number of variables created through the API.
    #[must_use]
    pub fn creates(&self) -> usize {
        self.state.lock().creates
    }

    /// Number of variables updated through the API.
    #[must_use]
    pub fn updates(&self) -> usize {
        self.state.lock().updates
    }

    /// Total number of write requests served.
    #[must_use]
    pub fn writes(&self) -> usize {
        let state = self.state.lock();
        state.creates + state.updates
    }

    /// Total number of requests of any kind served.
    #[must_use]
    pub fn requests(&self) -> usize {
        let state = self.state.lock();
        state.reads + state.creates + state.updates
    }
}

fn new_var(id: VarId, owner: VarOwner, name: &str, value: &str) -> EnvVar {
    let (device, application) = match owner {
        VarOwner::Device(id) => (Some(id), None),
        VarOwner::Fleet(id) => (None, Some(id)),
    };
    EnvVar {
        id,
        name: name.to_string(),
        value: value.to_string(),
        device,
        application,
    }
}

fn var_scope(var: &EnvVar) -> Scope {
    if var.device.is_some() {
        Scope::Device
    } else {
        Scope::Fleet
    }
}

#[async_trait]
impl FleetApi for MockFleetApi {
    async fn list_devices(&self, fleet_id: FleetId) -> Result<Vec<Device>> {
        let mut state = self.state.lock();
        state.check_failure()?;
        state.reads += 1;
        Ok(state
            .devices
            .iter()
            .filter(|(fleet, _)| *fleet == fleet_id)
            .map(|(_, device)| device.clone())
            .collect())
    }

    async fn list_vars(&self, query: &VarQuery) -> Result<Vec<EnvVar>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let mut state = self.state.lock();
        state.check_failure()?;
        state.reads += 1;
        Ok(state
            .vars
            .iter()
            .filter(|v| var_scope(v) == query.scope() && query.matches(v))
            .cloned()
            .collect())
    }

    async fn create_var(&self, owner: VarOwner, name: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check_failure()?;
        if state.find(owner, name).is_some() {
            return Err(FleetError::Status {
                status: 409,
                message: format!("{name} already exists"),
            });
        }
        state.creates += 1;
        state.next_var_id += 1;
        let id = VarId::new(state.next_var_id);
        state.vars.push(new_var(id, owner, name, value));
        Ok(())
    }

    async fn update_var(&self, scope: Scope, id: VarId, value: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check_failure()?;
        let var = state
            .vars
            .iter_mut()
            .find(|v| v.id == id && var_scope(v) == scope)
            .ok_or_else(|| FleetError::Status {
                status: 404,
                message: format!("variable {id} not found"),
            })?;
        var.value = value.to_string();
        state.updates += 1;
        Ok(())
    }
}
