//! Key/value client for the fleet-management API.
//!
//! The fleet-management API stores environment variables scoped either to a
//! single device or to a whole fleet. This crate exposes typed access to both
//! namespaces:
//!
//! - [`FleetApi`]: list devices, list/create/update variables, idempotent upsert
//! - [`HttpFleetClient`]: the reqwest-backed implementation
//! - [`VarQuery`]: server-side filters over a scope, name and owner set
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐
//! │  Role Resolver / │────▶│    FleetApi      │
//! │  Publisher       │     │    (trait)       │
//! └──────────────────┘     └────────┬─────────┘
//!                                   │
//!                          ┌────────▼─────────┐
//!                          │  HttpFleetClient │
//!                          │  (impl)          │
//!                          └────────┬─────────┘
//!                                   │ HTTPS + bearer
//!                          ┌────────▼─────────┐
//!                          │ Fleet-management │
//!                          │ API (OData)      │
//!                          └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use k3s_context_fleet::{FleetApi, HttpFleetClient, VarOwner};
//! use k3s_context_core::{FleetId, URL_VAR};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpFleetClient::new("https://api.balena-cloud.com/v6", "api-key");
//! let fleet = VarOwner::Fleet(FleetId::new(42));
//!
//! // Creates, updates, or leaves the variable alone.
//! let outcome = client.upsert_var(fleet, URL_VAR, "https://10.0.0.4:6443").await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod error;
pub mod query;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use client::{FleetApi, HttpFleetClient, UpsertOutcome};
pub use error::{FleetError, Result};
pub use query::{Scope, VarOwner, VarQuery};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockFleetApi;
