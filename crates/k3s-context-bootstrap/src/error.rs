//! Error types for the bootstrap protocol.
//!
//! A missing join-token file is not an error; it is reported as
//! [`PublishOutcome::TokenPending`](crate::PublishOutcome::TokenPending).

use k3s_context_core::{DeviceId, FleetId};
use k3s_context_fleet::FleetError;
use thiserror::Error;

/// A result type using `BootstrapError`.
pub type Result<T> = std::result::Result<T, BootstrapError>;

/// Errors that end a convergence cycle.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// A fleet-management API request failed.
    #[error("transport error: {0}")]
    Transport(#[from] FleetError),

    /// A server must be elected but no device in the fleet is online.
    #[error("no online device in fleet {0} can be elected as server")]
    NoOnlineCandidate(FleetId),

    /// The server device has no address to publish a join URL for.
    #[error("server device {0} has no reachable address")]
    NoLocalAddress(DeviceId),

    /// The local device is not a member of the configured fleet.
    #[error("device {uuid} is not a member of fleet {fleet_id}")]
    LocalDeviceNotFound {
        /// UUID the process was started with.
        uuid: String,
        /// Fleet that was searched.
        fleet_id: FleetId,
    },
}

impl BootstrapError {
    /// Returns true if a fresh process might get past this error.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retriable(),
            Self::NoOnlineCandidate(_) => true,
            Self::NoLocalAddress(_) | Self::LocalDeviceNotFound { .. } => false,
        }
    }
}
