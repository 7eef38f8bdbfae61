//! Variable scopes and server-side filters.
//!
//! Queries are rendered as OData `$filter` expressions, e.g.
//! `device in (2,5) and name eq 'K3S_ROLE'`.

use k3s_context_core::{DeviceId, EnvVar, FleetId};

/// Namespace a variable lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Attached to one device.
    Device,
    /// Attached to the fleet and visible to every device in it.
    Fleet,
}

impl Scope {
    /// API resource holding variables of this scope.
    #[must_use]
    pub const fn resource(self) -> &'static str {
        match self {
            Self::Device => "device_environment_variable",
            Self::Fleet => "application_environment_variable",
        }
    }

    /// Field naming the owner of a variable in this scope.
    #[must_use]
    pub const fn owner_field(self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Fleet => "application",
        }
    }
}

/// Owner of a variable: a device or a fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarOwner {
    /// A device-scoped variable.
    Device(DeviceId),
    /// A fleet-scoped variable.
    Fleet(FleetId),
}

impl VarOwner {
    /// Scope of variables owned by this owner.
    #[must_use]
    pub const fn scope(self) -> Scope {
        match self {
            Self::Device(_) => Scope::Device,
            Self::Fleet(_) => Scope::Fleet,
        }
    }

    /// Raw API id of the owner.
    #[must_use]
    pub const fn raw_id(self) -> u64 {
        match self {
            Self::Device(id) => id.get(),
            Self::Fleet(id) => id.get(),
        }
    }
}

/// A filtered read of variables by scope, name and owner set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarQuery {
    scope: Scope,
    owners: Vec<u64>,
    name: String,
}

impl VarQuery {
    /// Query the variable `name` of a single owner.
    #[must_use]
    pub fn new(owner: VarOwner, name: impl Into<String>) -> Self {
        Self {
            scope: owner.scope(),
            owners: vec![owner.raw_id()],
            name: name.into(),
        }
    }

    /// Query the device-scoped variable `name` across a set of devices.
    #[must_use]
    pub fn devices(ids: impl IntoIterator<Item = DeviceId>, name: impl Into<String>) -> Self {
        let mut owners: Vec<u64> = ids.into_iter().map(DeviceId::get).collect();
        owners.sort_unstable();
        owners.dedup();
        Self {
            scope: Scope::Device,
            owners,
            name: name.into(),
        }
    }

    /// Scope being queried.
    #[must_use]
    pub const fn scope(&self) -> Scope {
        self.scope
    }

    /// Variable name being queried.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw owner ids, sorted and deduplicated.
    #[must_use]
    pub fn owners(&self) -> &[u64] {
        &self.owners
    }

    /// Whether the owner set is empty; such a query matches nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Whether a variable of this query's scope satisfies the filter.
    #[must_use]
    pub fn matches(&self, var: &EnvVar) -> bool {
        let owner = match self.scope {
            Scope::Device => var.device.map(DeviceId::get),
            Scope::Fleet => var.application.map(FleetId::get),
        };
        var.name == self.name && owner.is_some_and(|id| self.owners.contains(&id))
    }

    /// Render the query as an OData `$filter` expression.
    #[must_use]
    pub fn odata_filter(&self) -> String {
        let field = self.scope.owner_field();
        let owners = if let [single] = self.owners.as_slice() {
            format!("{field} eq {single}")
        } else {
            let ids: Vec<String> = self.owners.iter().map(u64::to_string).collect();
            format!("{field} in ({})", ids.join(","))
        };
        format!("{owners} and name eq {}", quote(&self.name))
    }
}

/// Quote an OData string literal, doubling embedded quotes.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k3s_context_core::VarId;

    #[test]
    fn single_device_filter() {
        let query = VarQuery::new(VarOwner::Device(DeviceId::new(5)), "K3S_ROLE");
        assert_eq!(query.scope(), Scope::Device);
        assert_eq!(query.odata_filter(), "device eq 5 and name eq 'K3S_ROLE'");
    }

    #[test]
    fn fleet_filter() {
        let query = VarQuery::new(VarOwner::Fleet(FleetId::new(42)), "K3S_URL");
        assert_eq!(query.scope(), Scope::Fleet);
        assert_eq!(
            query.odata_filter(),
            "application eq 42 and name eq 'K3S_URL'"
        );
    }

    #[test]
    fn device_set_filter_is_sorted_and_deduplicated() {
        let ids = [9, 2, 5, 2].map(DeviceId::new);
        let query = VarQuery::devices(ids, "K3S_ROLE");
        assert_eq!(query.owners(), &[2, 5, 9]);
        assert_eq!(
            query.odata_filter(),
            "device in (2,5,9) and name eq 'K3S_ROLE'"
        );
    }

    #[test]
    fn quotes_are_escaped() {
        let query = VarQuery::new(VarOwner::Fleet(FleetId::new(1)), "it's");
        assert_eq!(query.odata_filter(), "application eq 1 and name eq 'it''s'");
    }

    #[test]
    fn empty_owner_set() {
        let query = VarQuery::devices(Vec::new(), "K3S_ROLE");
        assert!(query.is_empty());
    }

    #[test]
    fn matches_scope_owner_and_name() {
        let var = EnvVar {
            id: VarId::new(1),
            name: "K3S_ROLE".to_string(),
            value: "server".to_string(),
            device: Some(DeviceId::new(5)),
            application: None,
        };
        assert!(VarQuery::devices([DeviceId::new(2), DeviceId::new(5)], "K3S_ROLE").matches(&var));
        assert!(!VarQuery::devices([DeviceId::new(2)], "K3S_ROLE").matches(&var));
        assert!(!VarQuery::new(VarOwner::Device(DeviceId::new(5)), "K3S_URL").matches(&var));
        assert!(!VarQuery::new(VarOwner::Fleet(FleetId::new(5)), "K3S_ROLE").matches(&var));
    }
}
