//! Records read from the fleet-management API and the roles derived from them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CoreError;
use crate::ids::{DeviceId, FleetId, VarId};

/// Cluster role held by a device.
///
/// A device without a role variable has no `Role`; callers model that as
/// `Option<Role>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Runs the k3s control plane and publishes the join descriptor.
    Server,
    /// Joins the cluster run by the server.
    Agent,
}

impl Role {
    /// The value stored in the role variable.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Agent => "agent",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "server" => Ok(Self::Server),
            "agent" => Ok(Self::Agent),
            other => Err(CoreError::InvalidRole(other.to_string())),
        }
    }
}

/// A device in the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// API primary key.
    pub id: DeviceId,
    /// Stable identity the device knows itself by.
    pub uuid: String,
    /// Space-separated candidate addresses, primary first.
    #[serde(default)]
    pub ip_address: Option<String>,
    /// Liveness flag maintained by the fleet-management system.
    #[serde(default)]
    pub is_online: bool,
}

impl Device {
    /// First whitespace-separated entry of `ip_address`, if any.
    #[must_use]
    pub fn primary_address(&self) -> Option<&str> {
        self.ip_address.as_deref()?.split_whitespace().next()
    }
}

/// An environment variable scoped to a device or to a fleet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnvVar {
    /// API primary key.
    pub id: VarId,
    /// Variable name, unique per owner.
    pub name: String,
    /// Variable value.
    pub value: String,
    /// Owning device, for device-scoped variables.
    #[serde(default, deserialize_with = "foreign_key")]
    pub device: Option<DeviceId>,
    /// Owning fleet, for fleet-scoped variables.
    #[serde(default, deserialize_with = "foreign_key")]
    pub application: Option<FleetId>,
}

impl EnvVar {
    /// Interpret the value as a role.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidRole` if the value is neither `server` nor `agent`.
    pub fn role(&self) -> crate::Result<Role> {
        self.value.parse()
    }
}

/// Foreign keys come back either expanded (`{"__id": 5}`) or bare (`5`).
#[derive(Deserialize)]
#[serde(untagged)]
enum ForeignKey {
    Bare(u64),
    Ref {
        #[serde(rename = "__id")]
        id: u64,
    },
}

fn foreign_key<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: From<u64>,
{
    let key = Option::<ForeignKey>::deserialize(deserializer)?;
    Ok(key.map(|k| match k {
        ForeignKey::Bare(id) | ForeignKey::Ref { id } => T::from(id),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse() {
        assert_eq!("server".parse::<Role>().unwrap(), Role::Server);
        assert_eq!("agent\n".parse::<Role>().unwrap(), Role::Agent);
        assert!("master".parse::<Role>().is_err());
        assert_eq!(Role::Server.to_string(), "server");
    }

    #[test]
    fn primary_address_takes_first_token() {
        let mut device = Device {
            id: DeviceId::new(1),
            uuid: "abc".to_string(),
            ip_address: Some("10.0.0.4 172.17.0.1".to_string()),
            is_online: true,
        };
        assert_eq!(device.primary_address(), Some("10.0.0.4"));

        device.ip_address = Some("   ".to_string());
        assert_eq!(device.primary_address(), None);

        device.ip_address = None;
        assert_eq!(device.primary_address(), None);
    }

    #[test]
    fn device_decodes_with_missing_fields() {
        let device: Device =
            serde_json::from_str(r#"{"id": 7, "uuid": "abc", "ip_address": null}"#).unwrap();
        assert_eq!(device.id, DeviceId::new(7));
        assert!(!device.is_online);
        assert_eq!(device.primary_address(), None);
    }

    #[test]
    fn env_var_decodes_expanded_foreign_key() {
        let var: EnvVar = serde_json::from_str(
            r#"{"id": 11, "name": "K3S_ROLE", "value": "server", "device": {"__id": 5}}"#,
        )
        .unwrap();
        assert_eq!(var.device, Some(DeviceId::new(5)));
        assert_eq!(var.application, None);
        assert_eq!(var.role().unwrap(), Role::Server);
    }

    #[test]
    fn env_var_decodes_bare_foreign_key() {
        let var: EnvVar = serde_json::from_str(
            r#"{"id": 12, "name": "K3S_URL", "value": "https://10.0.0.4:6443", "application": 42}"#,
        )
        .unwrap();
        assert_eq!(var.application, Some(FleetId::new(42)));
        assert_eq!(var.device, None);
    }
}
