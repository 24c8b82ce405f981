//! In-memory stand-in for Azure used by orchestrator tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use crate::azure::{ResourceApi, ResourceConfig, ResourceHandle, ResourceId, ResourceKind};
use crate::error::{AzureError, Result};

/// A call made against the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateOrUpdate { kind: ResourceKind, name: String },
    Delete { kind: ResourceKind, name: String },
    List { kind: ResourceKind },
}

/// Fake resource manager holding resources in a map keyed by lowercased id.
#[derive(Debug)]
pub struct InMemoryResourceApi {
    subscription: ResourceId,
    resources: Mutex<BTreeMap<String, ResourceHandle>>,
    calls: Mutex<Vec<Call>>,
    failing_creates: Mutex<HashSet<ResourceKind>>,
    failing_deletes: Mutex<HashSet<ResourceKind>>,
}

impl Default for InMemoryResourceApi {
    fn default() -> Self {
        Self {
            subscription: ResourceId::subscription("00000000-0000-0000-0000-000000000000"),
            resources: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            failing_creates: Mutex::new(HashSet::new()),
            failing_deletes: Mutex::new(HashSet::new()),
        }
    }
}

impl InMemoryResourceApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every create of `kind` fail.
    pub fn fail_create(&self, kind: ResourceKind) {
        self.failing_creates.lock().unwrap().insert(kind);
    }

    /// Makes every delete of `kind` fail.
    pub fn fail_delete(&self, kind: ResourceKind) {
        self.failing_deletes.lock().unwrap().insert(kind);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn delete_calls(&self, kind: ResourceKind) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Delete { kind: k, .. } if *k == kind))
            .count()
    }

    /// Names of the resources that currently exist.
    pub fn resource_names(&self) -> Vec<String> {
        self.resources
            .lock()
            .unwrap()
            .values()
            .map(|h| h.name().to_string())
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn injected(kind: ResourceKind) -> crate::error::VnetError {
        AzureError::api_error(400, "InjectedFailure", format!("injected {kind} failure")).into()
    }
}

fn key(id: &ResourceId) -> String {
    id.as_str().to_ascii_lowercase()
}

#[async_trait]
impl ResourceApi for InMemoryResourceApi {
    async fn create_or_update(
        &self,
        scope: &ResourceId,
        kind: ResourceKind,
        name: &str,
        config: &ResourceConfig,
    ) -> Result<ResourceHandle> {
        self.record(Call::CreateOrUpdate {
            kind,
            name: name.to_string(),
        });

        if self.failing_creates.lock().unwrap().contains(&kind) {
            return Err(Self::injected(kind));
        }

        let mut resources = self.resources.lock().unwrap();
        if kind != ResourceKind::ResourceGroup && !resources.contains_key(&key(scope)) {
            return Err(AzureError::NotFound {
                resource_id: scope.to_string(),
            }
            .into());
        }

        let id = scope.child(kind, name);
        let body = config.to_arm_body();
        let mut properties = body
            .get("properties")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        properties["provisioningState"] = serde_json::json!("Succeeded");

        if let Some(subnets) = properties.get_mut("subnets").and_then(|s| s.as_array_mut()) {
            for subnet in subnets {
                let subnet_name = subnet["name"].as_str().unwrap_or_default().to_string();
                subnet["id"] = serde_json::json!(id.subnet(&subnet_name).as_str());
            }
        }

        let tags = match config {
            ResourceConfig::ResourceGroup { tags, .. } => tags.clone(),
            _ => BTreeMap::new(),
        };

        let handle = ResourceHandle {
            id: id.clone(),
            kind,
            location: body["location"].as_str().map(String::from),
            tags,
            properties,
        };
        resources.insert(key(&id), handle.clone());
        Ok(handle)
    }

    async fn delete(&self, handle: &ResourceHandle) -> Result<()> {
        self.record(Call::Delete {
            kind: handle.kind,
            name: handle.name().to_string(),
        });

        if self.failing_deletes.lock().unwrap().contains(&handle.kind) {
            return Err(Self::injected(handle.kind));
        }

        let mut resources = self.resources.lock().unwrap();
        resources.remove(&key(&handle.id));
        resources.retain(|_, r| !handle.id.contains(&r.id));
        Ok(())
    }

    async fn list_children(
        &self,
        scope: &ResourceId,
        kind: ResourceKind,
    ) -> Result<Vec<ResourceHandle>> {
        self.record(Call::List { kind });

        Ok(self
            .resources
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.kind == kind && scope.contains(&r.id))
            .cloned()
            .collect())
    }

    fn subscription(&self) -> ResourceId {
        self.subscription.clone()
    }
}
