//! The `FleetApi` trait and its HTTP implementation.
//!
//! Every request carries the bearer credential. Results come back as plain
//! sequences: list responses wrapped in an OData envelope (`{"d": [...]}`)
//! are unwrapped by [`decode_sequence`] before the caller sees them.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use k3s_context_core::{Device, EnvVar, FleetId, VarId};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::{FleetError, Result};
use crate::query::{Scope, VarOwner, VarQuery};

/// Key of the envelope list responses may be wrapped in.
const ENVELOPE_KEY: &str = "d";

/// Device fields the bootstrap protocol reads.
const DEVICE_FIELDS: &str = "id,uuid,ip_address,is_online";

/// What an upsert had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No variable existed; one was created.
    Created,
    /// A variable existed with a different value; it was updated.
    Updated,
    /// A variable existed with the same value; nothing was written.
    Unchanged,
}

impl UpsertOutcome {
    /// Whether a write request was issued.
    #[must_use]
    pub const fn wrote(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Typed access to the fleet-management key/value namespaces.
///
/// This trait abstracts the API so resolvers can run against an in-memory
/// fleet in tests.
#[async_trait]
pub trait FleetApi: Send + Sync {
    /// List every device belonging to a fleet, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns a `FleetError` if the request fails or the body is malformed.
    async fn list_devices(&self, fleet_id: FleetId) -> Result<Vec<Device>>;

    /// List the variables matching a query, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns a `FleetError` if the request fails or the body is malformed.
    async fn list_vars(&self, query: &VarQuery) -> Result<Vec<EnvVar>>;

    /// Create a variable.
    ///
    /// # Errors
    ///
    /// Returns a `FleetError` if the request fails.
    async fn create_var(&self, owner: VarOwner, name: &str, value: &str) -> Result<()>;

    /// Update the value of an existing variable.
    ///
    /// # Errors
    ///
    /// Returns a `FleetError` if the request fails.
    async fn update_var(&self, scope: Scope, id: VarId, value: &str) -> Result<()>;

    /// Make `name` hold `value` for `owner`, writing only when needed.
    ///
    /// Reads the existing variable first. If several are returned the first
    /// one is used. Writing a value that is already in place is a no-op.
    ///
    /// If another writer creates the variable between the read and the
    /// create, the conflict is resolved by reading again and updating the
    /// winner's variable when its value differs.
    ///
    /// # Errors
    ///
    /// Returns a `FleetError` if the read or the write fails.
    async fn upsert_var(&self, owner: VarOwner, name: &str, value: &str) -> Result<UpsertOutcome> {
        if let Some(var) = first_var(self, owner, name).await? {
            return update_if_changed(self, owner, &var, value).await;
        }

        tracing::info!(?owner, var = name, "Creating variable");
        match self.create_var(owner, name, value).await {
            Ok(()) => Ok(UpsertOutcome::Created),
            Err(e) if e.is_conflict() => {
                tracing::debug!(?owner, var = name, "Variable created concurrently, re-reading");
                match first_var(self, owner, name).await? {
                    Some(var) => update_if_changed(self, owner, &var, value).await,
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }
}

async fn first_var<F: FleetApi + ?Sized>(
    api: &F,
    owner: VarOwner,
    name: &str,
) -> Result<Option<EnvVar>> {
    Ok(api
        .list_vars(&VarQuery::new(owner, name))
        .await?
        .into_iter()
        .next())
}

async fn update_if_changed<F: FleetApi + ?Sized>(
    api: &F,
    owner: VarOwner,
    var: &EnvVar,
    value: &str,
) -> Result<UpsertOutcome> {
    if var.value == value {
        tracing::debug!(?owner, var = %var.name, "Variable already up to date");
        return Ok(UpsertOutcome::Unchanged);
    }
    tracing::info!(?owner, var = %var.name, var_id = %var.id, "Updating variable");
    api.update_var(owner.scope(), var.id, value).await?;
    Ok(UpsertOutcome::Updated)
}

/// Decode a list response into a plain sequence.
///
/// If the body is an object carrying the envelope key, its value is the
/// sequence; otherwise the body itself is.
///
/// # Errors
///
/// Returns `FleetError::Decode` if the sequence does not match `T`.
pub fn decode_sequence<T: DeserializeOwned>(body: Value) -> Result<Vec<T>> {
    let sequence = match body {
        Value::Object(mut map) if map.contains_key(ENVELOPE_KEY) => {
            map.remove(ENVELOPE_KEY).unwrap_or(Value::Null)
        }
        other => other,
    };
    serde_json::from_value(sequence).map_err(|e| FleetError::Decode(e.to_string()))
}

/// HTTP client for the fleet-management API.
#[derive(Clone)]
pub struct HttpFleetClient {
    client: reqwest::Client,
    api_root: String,
    token: String,
}

impl fmt::Debug for HttpFleetClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpFleetClient")
            .field("api_root", &self.api_root)
            .field("token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl HttpFleetClient {
    /// Create a new fleet client.
    ///
    /// # Arguments
    ///
    /// * `api_root` - Versioned API root (e.g., `https://api.balena-cloud.com/v6`)
    /// * `token` - Bearer credential sent with every request
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be created.
    #[must_use]
    pub fn new(api_root: impl Into<String>, token: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("failed to create HTTP client");

        Self::with_client(client, api_root, token)
    }

    /// Create a new fleet client with a custom reqwest client.
    #[must_use]
    pub fn with_client(
        client: reqwest::Client,
        api_root: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_root: api_root.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Get the API root.
    #[must_use]
    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    async fn get_sequence<T: DeserializeOwned>(
        &self,
        resource: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<T>> {
        let url = format!("{}/{resource}", self.api_root);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(params)
            .send()
            .await?;

        let body: Value = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| FleetError::Decode(e.to_string()))?;

        decode_sequence(body)
    }

    /// Turn a non-2xx response into `FleetError::Status`.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        tracing::error!(status = %status, message = %message, "Fleet API request failed");
        Err(FleetError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl FleetApi for HttpFleetClient {
    async fn list_devices(&self, fleet_id: FleetId) -> Result<Vec<Device>> {
        let filter = format!("belongs_to__application eq {fleet_id}");
        self.get_sequence("device", &[("$filter", filter.as_str()), ("$select", DEVICE_FIELDS)])
            .await
    }

    async fn list_vars(&self, query: &VarQuery) -> Result<Vec<EnvVar>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let filter = query.odata_filter();
        self.get_sequence(query.scope().resource(), &[("$filter", filter.as_str())])
            .await
    }

    async fn create_var(&self, owner: VarOwner, name: &str, value: &str) -> Result<()> {
        let scope = owner.scope();
        let url = format!("{}/{}", self.api_root, scope.resource());

        let mut body = json!({ "name": name, "value": value });
        body[scope.owner_field()] = json!(owner.raw_id());

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    async fn update_var(&self, scope: Scope, id: VarId, value: &str) -> Result<()> {
        let url = format!("{}/{}({id})", self.api_root, scope.resource());

        let response = self
            .client
            .patch(&url)
            .bearer_auth(&self.token)
            .json(&json!({ "value": value }))
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k3s_context_core::DeviceId;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "secret-key";

    async fn setup() -> (MockServer, HttpFleetClient) {
        let server = MockServer::start().await;
        let client = HttpFleetClient::new(format!("{}/v6/", server.uri()), TOKEN);
        (server, client)
    }

    #[test]
    fn decode_unwraps_envelope() {
        let body = json!({ "d": [{ "id": 1, "uuid": "a", "is_online": true }] });
        let devices: Vec<Device> = decode_sequence(body).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, DeviceId::new(1));
    }

    #[test]
    fn decode_accepts_raw_sequence() {
        let body = json!([{ "id": 1, "uuid": "a" }, { "id": 2, "uuid": "b" }]);
        let devices: Vec<Device> = decode_sequence(body).unwrap();
        assert_eq!(devices.len(), 2);
    }

    #[test]
    fn decode_rejects_malformed_body() {
        let result: Result<Vec<Device>> = decode_sequence(json!({ "error": "nope" }));
        assert!(matches!(result, Err(FleetError::Decode(_))));

        let result: Result<Vec<Device>> = decode_sequence(json!({ "d": [{ "uuid": 3 }] }));
        assert!(matches!(result, Err(FleetError::Decode(_))));
    }

    #[test]
    fn debug_redacts_token() {
        let client = HttpFleetClient::new("https://api.example.com/v6", TOKEN);
        let debug = format!("{client:?}");
        assert!(!debug.contains(TOKEN));
        assert_eq!(client.api_root(), "https://api.example.com/v6");
    }

    #[tokio::test]
    async fn list_devices_filters_by_fleet() {
        let (server, client) = setup().await;

        Mock::given(method("GET"))
            .and(path("/v6/device"))
            .and(header("authorization", "Bearer secret-key"))
            .and(query_param("$filter", "belongs_to__application eq 42"))
            .and(query_param("$select", DEVICE_FIELDS))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "d": [
                    { "id": 5, "uuid": "five", "ip_address": "10.0.0.5", "is_online": true },
                    { "id": 2, "uuid": "two", "ip_address": null, "is_online": false }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let devices = client.list_devices(FleetId::new(42)).await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].primary_address(), Some("10.0.0.5"));
        assert!(!devices[1].is_online);
    }

    #[tokio::test]
    async fn list_vars_uses_scope_resource_and_filter() {
        let (server, client) = setup().await;

        Mock::given(method("GET"))
            .and(path("/v6/device_environment_variable"))
            .and(query_param(
                "$filter",
                "device in (2,5) and name eq 'K3S_ROLE'",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "d": [{ "id": 9, "name": "K3S_ROLE", "value": "server", "device": { "__id": 2 } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let query = VarQuery::devices([DeviceId::new(5), DeviceId::new(2)], "K3S_ROLE");
        let vars = client.list_vars(&query).await.unwrap();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].device, Some(DeviceId::new(2)));
    }

    #[tokio::test]
    async fn empty_query_skips_request() {
        let (server, client) = setup().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let vars = client
            .list_vars(&VarQuery::devices(Vec::new(), "K3S_ROLE"))
            .await
            .unwrap();
        assert!(vars.is_empty());
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let (server, client) = setup().await;

        Mock::given(method("GET"))
            .and(path("/v6/device"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .mount(&server)
            .await;

        let err = client.list_devices(FleetId::new(42)).await.unwrap_err();
        assert!(matches!(
            err,
            FleetError::Status { status: 401, ref message } if message == "Unauthorized"
        ));
    }

    #[tokio::test]
    async fn malformed_body_is_an_error() {
        let (server, client) = setup().await;

        Mock::given(method("GET"))
            .and(path("/v6/device"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client.list_devices(FleetId::new(42)).await.unwrap_err();
        assert!(matches!(err, FleetError::Decode(_)));
    }

    #[tokio::test]
    async fn create_posts_owner_name_and_value() {
        let (server, client) = setup().await;

        Mock::given(method("POST"))
            .and(path("/v6/application_environment_variable"))
            .and(header("authorization", "Bearer secret-key"))
            .and(body_json(json!({
                "application": 42,
                "name": "K3S_URL",
                "value": "https://10.0.0.5:6443"
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        client
            .create_var(
                VarOwner::Fleet(FleetId::new(42)),
                "K3S_URL",
                "https://10.0.0.5:6443",
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn update_patches_by_id() {
        let (server, client) = setup().await;

        Mock::given(method("PATCH"))
            .and(path("/v6/device_environment_variable(77)"))
            .and(body_json(json!({ "value": "server" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client
            .update_var(Scope::Device, VarId::new(77), "server")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn upsert_creates_when_absent() {
        let (server, client) = setup().await;

        Mock::given(method("GET"))
            .and(path("/v6/device_environment_variable"))
            .and(query_param("$filter", "device eq 2 and name eq 'K3S_ROLE'"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "d": [] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v6/device_environment_variable"))
            .and(body_json(json!({ "device": 2, "name": "K3S_ROLE", "value": "server" })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client
            .upsert_var(VarOwner::Device(DeviceId::new(2)), "K3S_ROLE", "server")
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Created);
    }

    #[tokio::test]
    async fn upsert_skips_write_when_value_matches() {
        let (server, client) = setup().await;

        Mock::given(method("GET"))
            .and(path("/v6/application_environment_variable"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "d": [{ "id": 3, "name": "K3S_ROLE", "value": "agent", "application": { "__id": 42 } }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let outcome = client
            .upsert_var(VarOwner::Fleet(FleetId::new(42)), "K3S_ROLE", "agent")
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Unchanged);
        assert!(!outcome.wrote());
    }

    #[tokio::test]
    async fn upsert_updates_first_match_when_value_differs() {
        let (server, client) = setup().await;

        Mock::given(method("GET"))
            .and(path("/v6/application_environment_variable"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": 3, "name": "K3S_TOKEN", "value": "old", "application": 42 },
                { "id": 4, "name": "K3S_TOKEN", "value": "older", "application": 42 }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/v6/application_environment_variable(3)"))
            .and(body_json(json!({ "value": "new" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client
            .upsert_var(VarOwner::Fleet(FleetId::new(42)), "K3S_TOKEN", "new")
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);
    }
}
