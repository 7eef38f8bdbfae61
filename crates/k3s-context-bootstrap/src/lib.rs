//! Leaderless k3s server election over a fleet key/value store.
//!
//! Devices in a fleet boot independently and share nothing but the
//! fleet-management API's environment variables. This crate uses those
//! variables to elect exactly one k3s server and publish its join URL and
//! token to the rest of the fleet.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ConvergenceLoop                          │
//! │   mode check ─▶ resolve ─▶ (server) publish ─▶ sleep        │
//! └─────────────────────────────────────────────────────────────┘
//!                │                         │
//!                ▼                         ▼
//!        ┌──────────────┐          ┌──────────────┐
//!        │ RoleResolver │          │  Publisher   │◀── node-token file
//!        └──────┬───────┘          └──────┬───────┘
//!               └────────────┬────────────┘
//!                            ▼
//!                  ┌──────────────────┐
//!                  │ FleetApi (KV)    │
//!                  └──────────────────┘
//! ```
//!
//! # Protocol
//!
//! - A device with a `K3S_ROLE` variable of its own holds that role.
//! - Otherwise the fleet-wide `K3S_ROLE` default (`agent`) applies.
//! - Otherwise, if no device is `server` yet, the online device with the
//!   smallest id is written as `server` by whichever devices observe it.
//! - The server publishes `K3S_URL`, `K3S_ROLE=agent` and `K3S_TOKEN` at
//!   fleet scope every cycle.
//!
//! Polling adapts to state:
//!
//! | State                       | Next interval        |
//! |-----------------------------|----------------------|
//! | disabled                    | `idle_interval`      |
//! | unset / token pending       | `retry_interval`     |
//! | agent / token published     | `heartbeat_interval` |
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use k3s_context_bootstrap::{BootstrapConfig, ConvergenceLoop};
//! use k3s_context_fleet::HttpFleetClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BootstrapConfig::from_env();
//! let client = HttpFleetClient::new(
//!     config.api_root.clone(),
//!     config.api_key.clone().unwrap_or_default(),
//! );
//!
//! let mut bootstrap = ConvergenceLoop::new(config, Arc::new(client));
//! bootstrap.run().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod convergence;
pub mod error;
pub mod publisher;
pub mod resolver;

pub use config::{BootstrapConfig, DisabledReason, Mode};
pub use convergence::{ConvergenceLoop, ConvergenceState};
pub use error::{BootstrapError, Result};
pub use publisher::{join_url, PublishOutcome, Publisher};
pub use resolver::{elect, ElectionOutcome, Resolution, RoleResolver};
