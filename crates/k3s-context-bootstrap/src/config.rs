//! Bootstrap configuration.
//!
//! The configuration is read from the process environment once at startup and
//! handed to the [`ConvergenceLoop`](crate::ConvergenceLoop) by value. Nothing
//! below the binary reads the environment.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use k3s_context_core::FleetId;

/// Default fleet-management API root.
pub const DEFAULT_API_ROOT: &str = "https://api.balena-cloud.com/v6";

/// Where the k3s server writes the cluster join token.
pub const DEFAULT_TOKEN_PATH: &str = "/var/lib/rancher/k3s/server/node-token";

/// Configuration for the convergence loop.
#[derive(Clone)]
pub struct BootstrapConfig {
    /// Versioned fleet-management API root.
    pub api_root: String,
    /// Bearer credential. `None` puts the loop in idle mode.
    pub api_key: Option<String>,
    /// Fleet this device belongs to.
    pub fleet_id: Option<FleetId>,
    /// Stable identity of this device.
    pub device_uuid: Option<String>,
    /// Path of the k3s join-token file.
    pub token_path: PathBuf,
    /// Interval used while the protocol is disabled.
    pub idle_interval: Duration,
    /// Interval used once this device has converged.
    pub heartbeat_interval: Duration,
    /// Interval used while resolution or publishing is incomplete.
    pub retry_interval: Duration,
}

/// Why the protocol is not running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisabledReason {
    /// No bootstrap credential was configured.
    MissingCredential,
    /// The device runs in local development mode.
    LocalDevelopment,
    /// The fleet id or device UUID is missing.
    MissingIdentity,
}

/// Whether a cycle should talk to the fleet-management API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode<'a> {
    /// The protocol runs for this device.
    Enabled {
        /// Fleet the device belongs to.
        fleet_id: FleetId,
        /// Device identity.
        device_uuid: &'a str,
    },
    /// The protocol is inapplicable; the loop idles.
    Disabled(DisabledReason),
}

impl BootstrapConfig {
    const fn default_idle_secs() -> u64 {
        3600
    }

    const fn default_heartbeat_secs() -> u64 {
        60
    }

    const fn default_retry_secs() -> u64 {
        5
    }

    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `BALENA_APP_ID`: Fleet id
    /// - `BALENA_DEVICE_UUID`: Device identity
    /// - `BOOTSTRAP_API_KEY`: Fleet-management API credential
    /// - `BALENA_API_ROOT`: API root (default `https://api.balena-cloud.com/v6`)
    /// - `K3S_TOKEN_PATH`: Join-token file
    /// - `IDLE_INTERVAL_SECS`, `HEARTBEAT_INTERVAL_SECS`, `RETRY_INTERVAL_SECS`:
    ///   Polling intervals
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    ///
    /// Empty values count as absent. Unparseable or zero intervals fall back to
    /// defaults.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let secs = |key: &str, default: u64| {
            let secs = get(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|&secs| secs > 0)
                .unwrap_or(default);
            Duration::from_secs(secs)
        };

        let fleet_id = get("BALENA_APP_ID").and_then(|v| match v.parse::<FleetId>() {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unparseable BALENA_APP_ID");
                None
            }
        });

        let mut config = Self {
            fleet_id,
            device_uuid: get("BALENA_DEVICE_UUID"),
            api_key: get("BOOTSTRAP_API_KEY"),
            idle_interval: secs("IDLE_INTERVAL_SECS", Self::default_idle_secs()),
            heartbeat_interval: secs("HEARTBEAT_INTERVAL_SECS", Self::default_heartbeat_secs()),
            retry_interval: secs("RETRY_INTERVAL_SECS", Self::default_retry_secs()),
            ..Self::default()
        };
        if let Some(root) = get("BALENA_API_ROOT") {
            config.api_root = root;
        }
        if let Some(path) = get("K3S_TOKEN_PATH") {
            config.token_path = PathBuf::from(path);
        }
        config
    }

    /// Classify the configuration.
    ///
    /// A missing credential is checked first: it is the normal state of a
    /// device that was never handed a bootstrap key.
    #[must_use]
    pub fn mode(&self) -> Mode<'_> {
        if self.api_key.is_none() {
            return Mode::Disabled(DisabledReason::MissingCredential);
        }
        match (self.fleet_id, self.device_uuid.as_deref()) {
            (Some(fleet_id), _) if fleet_id.is_local_dev() => {
                Mode::Disabled(DisabledReason::LocalDevelopment)
            }
            (Some(fleet_id), Some(device_uuid)) => Mode::Enabled {
                fleet_id,
                device_uuid,
            },
            _ => Mode::Disabled(DisabledReason::MissingIdentity),
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            api_root: DEFAULT_API_ROOT.to_string(),
            api_key: None,
            fleet_id: None,
            device_uuid: None,
            token_path: PathBuf::from(DEFAULT_TOKEN_PATH),
            idle_interval: Duration::from_secs(Self::default_idle_secs()),
            heartbeat_interval: Duration::from_secs(Self::default_heartbeat_secs()),
            retry_interval: Duration::from_secs(Self::default_retry_secs()),
        }
    }
}

impl fmt::Debug for BootstrapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapConfig")
            .field("api_root", &self.api_root)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("fleet_id", &self.fleet_id)
            .field("device_uuid", &self.device_uuid)
            .field("token_path", &self.token_path)
            .field("idle_interval", &self.idle_interval)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("retry_interval", &self.retry_interval)
            .finish()
    }
}
