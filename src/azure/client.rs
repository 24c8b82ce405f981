//! Azure Resource Manager API client implementation.
//!
//! This module provides the HTTP client for the ARM REST API, including
//! waiting on long-running operations until they reach a terminal state.

use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::config::{AzureCredentials, AzureSettings};
use crate::error::{AzureError, Result};

use super::auth::ClientSecretCredential;
use super::types::{is_terminal_state, ArmPage, ArmResource, ResourceId};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Body fields never written to the log.
const SECRET_FIELDS: &[&str] = &["adminPassword"];

/// Header carrying the operation status URL.
const ASYNC_OPERATION_HEADER: &str = "azure-asyncoperation";

/// Azure Resource Manager client.
#[derive(Debug, Clone)]
pub struct ArmClient {
    /// HTTP client.
    client: Client,
    /// Token source.
    credential: Arc<ClientSecretCredential>,
    /// Management endpoint without trailing slash.
    endpoint: String,
    /// Subscription scope.
    subscription: ResourceId,
    /// Delay between polls when ARM does not send `Retry-After`.
    poll_interval: Duration,
    /// Upper bound on waiting for a single operation.
    operation_timeout: Duration,
}

/// Body of an `Azure-AsyncOperation` status resource.
#[derive(Debug, Deserialize)]
struct OperationStatus {
    status: String,
    #[serde(default)]
    error: Option<ArmErrorDetail>,
}

/// ARM error envelope.
#[derive(Debug, Deserialize)]
struct ArmErrorResponse {
    error: ArmErrorDetail,
}

/// ARM error detail.
#[derive(Debug, Deserialize)]
struct ArmErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// How a long-running operation reports progress.
enum PollTarget {
    /// `Azure-AsyncOperation`: poll a status resource.
    AsyncOperation(String),
    /// `Location`: poll until the URL stops answering 202.
    Location(String),
}

impl ArmClient {
    /// Creates a new ARM client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(credentials: &AzureCredentials, settings: &AzureSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| AzureError::network(format!("Failed to create HTTP client: {e}")))?;

        let credential =
            ClientSecretCredential::new(client.clone(), &settings.authority_host, credentials);

        Ok(Self {
            client,
            credential: Arc::new(credential),
            endpoint: settings.management_endpoint.trim_end_matches('/').to_string(),
            subscription: ResourceId::subscription(&credentials.subscription_id),
            poll_interval: Duration::from_secs(settings.poll_interval_secs),
            operation_timeout: Duration::from_secs(settings.operation_timeout_secs),
        })
    }

    /// Returns the subscription scope this client operates in.
    #[must_use]
    pub const fn subscription(&self) -> &ResourceId {
        &self.subscription
    }

    /// Token scope for the management endpoint.
    fn scope(&self) -> String {
        format!("{}/.default", self.endpoint)
    }

    fn url(&self, path: &str, api_version: &str) -> String {
        format!("{}{path}?api-version={api_version}", self.endpoint)
    }

    /// Attaches the bearer token and sends the request.
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let token = self.credential.token(&self.scope()).await?;

        request
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .await
            .map_err(|e| AzureError::network(format!("Request failed: {e}")).into())
    }

    /// Maps non-success responses to errors.
    async fn check_status(response: Response, resource_id: &str) -> Result<Response> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AzureError::Throttled {
                retry_after_secs: retry_after(&response).map_or(60, |d| d.as_secs()),
            }
            .into());
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(AzureError::AuthenticationFailed {
                message: parse_arm_error(&body).map_or(body, |e| e.message),
            }
            .into());
        }

        if status == StatusCode::NOT_FOUND {
            return Err(AzureError::NotFound {
                resource_id: resource_id.to_string(),
            }
            .into());
        }

        let body = response.text().await.unwrap_or_default();
        let (code, message) =
            parse_arm_error(&body).map_or_else(|| (String::new(), body), |e| (e.code, e.message));
        Err(AzureError::api_error(status.as_u16(), code, message).into())
    }

    /// Creates or replaces a resource and waits until ARM reports it provisioned.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the operation ends unsuccessfully.
    pub async fn put(
        &self,
        id: &ResourceId,
        api_version: &str,
        body: &serde_json::Value,
    ) -> Result<ArmResource> {
        debug!("PUT {id}");
        trace!("Request body: {}", redacted(body));

        let request = self
            .client
            .request(Method::PUT, self.url(id.as_str(), api_version))
            .json(body);
        let response = Self::check_status(self.send(request).await?, id.as_str()).await?;

        if let Some(target) = poll_target(&response) {
            self.wait_for_operation(id, target, retry_after(&response)).await?;
            return self.get(id, api_version).await;
        }

        let resource: ArmResource = response
            .json()
            .await
            .map_err(|e| AzureError::invalid_response(format!("Failed to parse response: {e}")))?;

        match provisioning_state(&resource) {
            Some(state) if !is_terminal_state(state) => {
                self.wait_for_provisioning(id, api_version).await
            }
            Some(state) if !state.eq_ignore_ascii_case("Succeeded") => {
                Err(AzureError::OperationFailed {
                    resource_id: id.to_string(),
                    status: state.to_string(),
                    message: String::from("Resource provisioning did not succeed"),
                }
                .into())
            }
            _ => Ok(resource),
        }
    }

    /// Gets a resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource does not exist or the request fails.
    pub async fn get(&self, id: &ResourceId, api_version: &str) -> Result<ArmResource> {
        debug!("GET {id}");

        let request = self
            .client
            .request(Method::GET, self.url(id.as_str(), api_version));
        let response = Self::check_status(self.send(request).await?, id.as_str()).await?;

        response
            .json()
            .await
            .map_err(|e| AzureError::invalid_response(format!("Failed to parse response: {e}")).into())
    }

    /// Deletes a resource and waits for the deletion to finish.
    ///
    /// Deleting a resource that no longer exists succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the operation ends unsuccessfully.
    pub async fn delete(&self, id: &ResourceId, api_version: &str) -> Result<()> {
        debug!("DELETE {id}");

        let request = self
            .client
            .request(Method::DELETE, self.url(id.as_str(), api_version));
        let response = self.send(request).await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("{id} was already deleted");
            return Ok(());
        }

        let response = Self::check_status(response, id.as_str()).await?;

        if let Some(target) = poll_target(&response) {
            self.wait_for_operation(id, target, retry_after(&response)).await?;
        }

        Ok(())
    }

    /// Lists every resource in a collection, following `nextLink`.
    ///
    /// # Errors
    ///
    /// Returns an error if any page cannot be fetched.
    pub async fn list(&self, collection: &str, api_version: &str) -> Result<Vec<ArmResource>> {
        debug!("LIST {collection}");

        let mut resources = Vec::new();
        let mut next = Some(self.url(collection, api_version));

        while let Some(url) = next {
            let request = self.client.request(Method::GET, url);
            let response = Self::check_status(self.send(request).await?, collection).await?;
            let page: ArmPage = response
                .json()
                .await
                .map_err(|e| AzureError::invalid_response(format!("Failed to parse page: {e}")))?;

            resources.extend(page.value);
            next = page.next_link;
        }

        Ok(resources)
    }

    /// Polls a long-running operation until it reaches a terminal state.
    async fn wait_for_operation(
        &self,
        id: &ResourceId,
        target: PollTarget,
        mut delay: Option<Duration>,
    ) -> Result<()> {
        let start = Instant::now();

        loop {
            tokio::time::sleep(delay.unwrap_or(self.poll_interval)).await;

            if start.elapsed() > self.operation_timeout {
                return Err(AzureError::Timeout {
                    resource_id: id.to_string(),
                }
                .into());
            }

            match &target {
                PollTarget::AsyncOperation(url) => {
                    let request = self.client.request(Method::GET, url);
                    let response = Self::check_status(self.send(request).await?, id.as_str()).await?;
                    delay = retry_after(&response);

                    let status: OperationStatus = response.json().await.map_err(|e| {
                        AzureError::invalid_response(format!("Failed to parse operation status: {e}"))
                    })?;
                    trace!("Operation on {id}: {}", status.status);

                    if status.status.eq_ignore_ascii_case("Succeeded") {
                        return Ok(());
                    }
                    if is_terminal_state(&status.status) {
                        return Err(AzureError::OperationFailed {
                            resource_id: id.to_string(),
                            status: status.status,
                            message: status.error.map(|e| e.message).unwrap_or_default(),
                        }
                        .into());
                    }
                }
                PollTarget::Location(url) => {
                    let request = self.client.request(Method::GET, url);
                    let response = Self::check_status(self.send(request).await?, id.as_str()).await?;
                    delay = retry_after(&response);

                    if response.status() != StatusCode::ACCEPTED {
                        return Ok(());
                    }
                    trace!("Operation on {id} still in progress");
                }
            }
        }
    }

    /// Polls a resource until its provisioning state is terminal.
    async fn wait_for_provisioning(&self, id: &ResourceId, api_version: &str) -> Result<ArmResource> {
        let start = Instant::now();

        loop {
            tokio::time::sleep(self.poll_interval).await;

            let resource = self.get(id, api_version).await?;
            match provisioning_state(&resource) {
                Some(state) if !is_terminal_state(state) => {
                    trace!("{id} is {state}");
                }
                Some(state) if !state.eq_ignore_ascii_case("Succeeded") => {
                    return Err(AzureError::OperationFailed {
                        resource_id: id.to_string(),
                        status: state.to_string(),
                        message: String::from("Resource provisioning did not succeed"),
                    }
                    .into());
                }
                _ => return Ok(resource),
            }

            if start.elapsed() > self.operation_timeout {
                return Err(AzureError::Timeout {
                    resource_id: id.to_string(),
                }
                .into());
            }
        }
    }
}

/// Reads the long-running operation target from a response.
fn poll_target(response: &Response) -> Option<PollTarget> {
    let header_value = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    };

    if let Some(url) = header_value(ASYNC_OPERATION_HEADER) {
        return Some(PollTarget::AsyncOperation(url));
    }

    if response.status() == StatusCode::ACCEPTED {
        return header_value(header::LOCATION.as_str()).map(PollTarget::Location);
    }

    None
}

/// Reads `Retry-After` as a number of seconds.
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
        .map(Duration::from_secs)
}

fn provisioning_state(resource: &ArmResource) -> Option<&str> {
    resource
        .properties
        .get("provisioningState")
        .and_then(serde_json::Value::as_str)
}

/// Copy of a request body with secret fields masked.
fn redacted(body: &serde_json::Value) -> serde_json::Value {
    match body {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let value = if SECRET_FIELDS.contains(&k.as_str()) {
                    serde_json::Value::String(String::from("***"))
                } else {
                    redacted(v)
                };
                (k.clone(), value)
            })
            .collect(),
        serde_json::Value::Array(items) => items.iter().map(redacted).collect(),
        other => other.clone(),
    }
}

fn parse_arm_error(body: &str) -> Option<ArmErrorDetail> {
    serde_json::from_str::<ArmErrorResponse>(body)
        .ok()
        .map(|e| e.error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::ResourceKind;
    use crate::error::VnetError;
    use wiremock::matchers::{header as header_eq, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SUB: &str = "sub-1";

    async fn setup() -> (MockServer, ArmClient) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "expires_in": 3599,
                "access_token": "tok"
            })))
            .mount(&server)
            .await;

        let credentials = AzureCredentials {
            client_id: String::from("app"),
            client_secret: String::from("secret"),
            tenant_id: String::from("tenant-1"),
            subscription_id: String::from(SUB),
        };
        let settings = AzureSettings {
            management_endpoint: server.uri(),
            authority_host: server.uri(),
            poll_interval_secs: 0,
            operation_timeout_secs: 30,
        };

        let client = ArmClient::new(&credentials, &settings).unwrap();
        (server, client)
    }

    fn rg_id() -> ResourceId {
        ResourceId::subscription(SUB).child(ResourceKind::ResourceGroup, "rg1")
    }

    #[test]
    fn test_logged_body_masks_admin_password() {
        let body = serde_json::json!({
            "properties": {
                "osProfile": {
                    "adminUsername": "azureuser",
                    "adminPassword": "Sup3rS3cret!Pw",
                },
                "networkProfile": { "networkInterfaces": [{ "id": "nic" }] },
            }
        });

        let logged = redacted(&body).to_string();
        assert!(!logged.contains("Sup3rS3cret!Pw"));
        assert!(logged.contains("azureuser"));
        assert!(logged.contains("\"id\":\"nic\""));
        // The body actually sent is untouched.
        assert_eq!(
            body["properties"]["osProfile"]["adminPassword"],
            "Sup3rS3cret!Pw"
        );
    }

    #[tokio::test]
    async fn test_put_completes_immediately() {
        let (server, client) = setup().await;
        let id = rg_id();

        Mock::given(method("PUT"))
            .and(path(id.as_str()))
            .and(query_param("api-version", "2022-09-01"))
            .and(header_eq("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": id.as_str(),
                "name": "rg1",
                "location": "eastus",
                "properties": { "provisioningState": "Succeeded" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let body = serde_json::json!({ "location": "eastus" });
        let resource = client.put(&id, "2022-09-01", &body).await.unwrap();
        assert_eq!(resource.id, id.as_str());
    }

    #[tokio::test]
    async fn test_put_waits_on_async_operation() {
        let (server, client) = setup().await;
        let id = rg_id().child(ResourceKind::VirtualNetwork, "vnet1");
        let operation_url = format!("{}/operations/op-1", server.uri());

        Mock::given(method("PUT"))
            .and(path(id.as_str()))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Azure-AsyncOperation", operation_url.as_str())
                    .set_body_json(serde_json::json!({
                        "id": id.as_str(),
                        "properties": { "provisioningState": "Updating" }
                    })),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/operations/op-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "Succeeded" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(id.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": id.as_str(),
                "properties": { "provisioningState": "Succeeded", "subnets": [] }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resource = client
            .put(&id, "2023-09-01", &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(resource.properties["provisioningState"], "Succeeded");
    }

    #[tokio::test]
    async fn test_failed_operation_is_error() {
        let (server, client) = setup().await;
        let id = rg_id().child(ResourceKind::NetworkSecurityGroup, "nsg1");
        let operation_url = format!("{}/operations/op-2", server.uri());

        Mock::given(method("PUT"))
            .and(path(id.as_str()))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Azure-AsyncOperation", operation_url.as_str())
                    .set_body_json(serde_json::json!({ "id": id.as_str() })),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/operations/op-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "Failed",
                "error": { "code": "SecurityRuleConflict", "message": "Priority already in use" }
            })))
            .mount(&server)
            .await;

        let err = client
            .put(&id, "2023-09-01", &serde_json::json!({}))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            VnetError::Azure(AzureError::OperationFailed { ref status, ref message, .. })
                if status == "Failed" && message.contains("Priority")
        ));
    }

    #[tokio::test]
    async fn test_bad_request_carries_arm_code() {
        let (server, client) = setup().await;
        let id = rg_id();

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": { "code": "LocationNotAvailableForResourceGroup", "message": "nope" }
            })))
            .mount(&server)
            .await;

        let err = client
            .put(&id, "2022-09-01", &serde_json::json!({}))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            VnetError::Azure(AzureError::ApiRequestFailed { status: 400, ref code, .. })
                if code == "LocationNotAvailableForResourceGroup"
        ));
    }

    #[tokio::test]
    async fn test_delete_polls_location() {
        let (server, client) = setup().await;
        let id = rg_id();
        let location = format!("{}/operationresults/del-1", server.uri());

        Mock::given(method("DELETE"))
            .and(path(id.as_str()))
            .respond_with(ResponseTemplate::new(202).insert_header("Location", location.as_str()))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/operationresults/del-1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        tokio_test::assert_ok!(client.delete(&id, "2022-09-01").await);
    }

    #[tokio::test]
    async fn test_delete_missing_resource_succeeds() {
        let (server, client) = setup().await;

        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        tokio_test::assert_ok!(client.delete(&rg_id(), "2022-09-01").await);
    }

    #[tokio::test]
    async fn test_list_follows_next_link() {
        let (server, client) = setup().await;
        let collection = rg_id().collection(ResourceKind::VirtualNetwork);
        let vnet = |name: &str| {
            serde_json::json!({ "id": rg_id().child(ResourceKind::VirtualNetwork, name).as_str() })
        };

        Mock::given(method("GET"))
            .and(path(collection.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": [vnet("vnet1")],
                "nextLink": format!("{}/page-2", server.uri())
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": [vnet("vnet2")]
            })))
            .mount(&server)
            .await;

        let resources = client.list(&collection, "2023-09-01").await.unwrap();
        assert_eq!(resources.len(), 2);
    }

    #[tokio::test]
    async fn test_throttling_is_reported() {
        let (server, client) = setup().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "17"))
            .mount(&server)
            .await;

        let err = client.get(&rg_id(), "2022-09-01").await.unwrap_err();
        assert!(matches!(
            err,
            VnetError::Azure(AzureError::Throttled { retry_after_secs: 17 })
        ));
    }
}
