//! Resource management trait and its ARM-backed implementation.
//!
//! The orchestrator only talks to Azure through [`ResourceApi`], which
//! lets runs be driven against fakes in tests.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::Result;

use super::client::ArmClient;
use super::types::{ResourceConfig, ResourceHandle, ResourceId, ResourceKind};

/// Operations on Azure resources.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceApi: Send + Sync {
    /// Creates or updates the resource `name` of `kind` under `scope`.
    ///
    /// Waits until the resource has reached a terminal provisioning state.
    async fn create_or_update(
        &self,
        scope: &ResourceId,
        kind: ResourceKind,
        name: &str,
        config: &ResourceConfig,
    ) -> Result<ResourceHandle>;

    /// Deletes a resource and waits for the deletion to finish.
    ///
    /// Deleting a resource that no longer exists succeeds.
    async fn delete(&self, handle: &ResourceHandle) -> Result<()>;

    /// Lists the resources of `kind` directly under `scope`.
    async fn list_children(
        &self,
        scope: &ResourceId,
        kind: ResourceKind,
    ) -> Result<Vec<ResourceHandle>>;

    /// Returns the subscription scope resource groups are created in.
    fn subscription(&self) -> ResourceId;
}

#[async_trait]
impl ResourceApi for ArmClient {
    async fn create_or_update(
        &self,
        scope: &ResourceId,
        kind: ResourceKind,
        name: &str,
        config: &ResourceConfig,
    ) -> Result<ResourceHandle> {
        let id = scope.child(kind, name);
        info!("Creating or updating {kind} {name}");

        let resource = self
            .put(&id, kind.api_version(), &config.to_arm_body())
            .await?;
        let handle = ResourceHandle::from_arm(kind, resource)?;

        debug!(
            "{kind} {name} is {}",
            handle.provisioning_state().unwrap_or("provisioned")
        );
        Ok(handle)
    }

    async fn delete(&self, handle: &ResourceHandle) -> Result<()> {
        info!("Deleting {} {}", handle.kind, handle.name());
        ArmClient::delete(self, &handle.id, handle.kind.api_version()).await
    }

    async fn list_children(
        &self,
        scope: &ResourceId,
        kind: ResourceKind,
    ) -> Result<Vec<ResourceHandle>> {
        let resources = self.list(&scope.collection(kind), kind.api_version()).await?;

        resources
            .into_iter()
            .map(|r| ResourceHandle::from_arm(kind, r))
            .collect()
    }

    fn subscription(&self) -> ResourceId {
        ArmClient::subscription(self).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::SubnetData;
    use crate::config::{AzureCredentials, AzureSettings};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> ArmClient {
        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "expires_in": 3599,
                "access_token": "tok"
            })))
            .mount(server)
            .await;

        let credentials = AzureCredentials {
            client_id: String::from("app"),
            client_secret: String::from("secret"),
            tenant_id: String::from("tenant-1"),
            subscription_id: String::from("sub-1"),
        };
        let settings = AzureSettings {
            management_endpoint: server.uri(),
            authority_host: server.uri(),
            poll_interval_secs: 0,
            operation_timeout_secs: 30,
        };
        ArmClient::new(&credentials, &settings).unwrap()
    }

    #[tokio::test]
    async fn test_create_network_returns_subnets() {
        let server = MockServer::start().await;
        let api = client(&server).await;

        let rg = api.subscription().child(ResourceKind::ResourceGroup, "rg1");
        let vnet = rg.child(ResourceKind::VirtualNetwork, "vnet1");
        let nsg = rg.child(ResourceKind::NetworkSecurityGroup, "nsg1");

        Mock::given(method("PUT"))
            .and(path(vnet.as_str()))
            .and(query_param("api-version", ResourceKind::VirtualNetwork.api_version()))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": vnet.as_str(),
                "name": "vnet1",
                "location": "eastus",
                "properties": {
                    "provisioningState": "Succeeded",
                    "subnets": [{
                        "name": "besubnet",
                        "id": vnet.subnet("besubnet").as_str(),
                        "properties": { "networkSecurityGroup": { "id": nsg.as_str() } }
                    }]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = ResourceConfig::VirtualNetwork {
            location: String::from("eastus"),
            address_prefixes: vec![String::from("192.168.0.0/16")],
            subnets: vec![SubnetData {
                name: String::from("besubnet"),
                address_prefix: String::from("192.168.2.0/24"),
                network_security_group: Some(nsg.clone()),
            }],
        };

        let handle = api
            .create_or_update(&rg, ResourceKind::VirtualNetwork, "vnet1", &config)
            .await
            .unwrap();

        assert_eq!(handle.id, vnet);
        assert_eq!(handle.provisioning_state(), Some("Succeeded"));
        assert_eq!(
            handle.subnet("besubnet").and_then(|s| s.network_security_group),
            Some(nsg)
        );
    }

    #[tokio::test]
    async fn test_list_children_builds_handles() {
        let server = MockServer::start().await;
        let api = client(&server).await;

        let rg = api.subscription().child(ResourceKind::ResourceGroup, "rg1");

        Mock::given(method("GET"))
            .and(path(rg.collection(ResourceKind::VirtualNetwork)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": [
                    { "id": rg.child(ResourceKind::VirtualNetwork, "vnet1").as_str(), "name": "vnet1" },
                    { "id": rg.child(ResourceKind::VirtualNetwork, "vnet2").as_str(), "name": "vnet2" }
                ]
            })))
            .mount(&server)
            .await;

        let networks = api
            .list_children(&rg, ResourceKind::VirtualNetwork)
            .await
            .unwrap();

        let names: Vec<&str> = networks.iter().map(ResourceHandle::name).collect();
        assert_eq!(names, vec!["vnet1", "vnet2"]);
        assert!(networks.iter().all(|n| n.kind == ResourceKind::VirtualNetwork));
    }
}
