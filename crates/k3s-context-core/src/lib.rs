//! Core types for k3s fleet bootstrapping.
//!
//! This crate provides the foundational types shared by the fleet client and
//! the bootstrap loop:
//!
//! - **Identifiers**: Strongly-typed ids for devices, fleets, and variables
//! - **Records**: `Device` and `EnvVar` as returned by the fleet-management API
//! - **Roles**: The cluster role a device holds (`server` or `agent`)
//!
//! # Example
//!
//! ```
//! use k3s_context_core::{DeviceId, Role};
//!
//! let a = DeviceId::new(2);
//! let b = DeviceId::new(5);
//! assert!(a < b);
//!
//! let role: Role = "server".parse().unwrap();
//! assert_eq!(role, Role::Server);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod types;

pub use error::{CoreError, Result};
pub use ids::{DeviceId, FleetId, VarId};
pub use types::{Device, EnvVar, Role};

/// Name of the variable holding a device's cluster role.
pub const ROLE_VAR: &str = "K3S_ROLE";

/// Name of the fleet variable holding the server's join URL.
pub const URL_VAR: &str = "K3S_URL";

/// Name of the fleet variable holding the cluster join token.
pub const TOKEN_VAR: &str = "K3S_TOKEN";

/// Port the k3s supervisor listens on for agent joins.
pub const K3S_SERVER_PORT: u16 = 6443;
