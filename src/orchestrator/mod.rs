//! Provisioning orchestrator.
//!
//! This module runs a [`ProvisioningPlan`] against a [`ResourceApi`]:
//! the resource group first, then every step strictly in order, then a
//! single best-effort delete of the resource group. A failing step
//! aborts the remaining steps but never the teardown.

mod context;
mod report;

pub use context::{RunContext, RunPhase};
pub use report::{RunReport, StepRecord, StepStatus, TeardownRecord};

use chrono::Utc;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::azure::{ResourceApi, ResourceConfig, ResourceHandle, ResourceId, ResourceKind, SubnetData};
use crate::error::{Result, RunError, VnetError};
use crate::planner::{PlannedStep, PlannedSubnet, ProvisioningPlan, StepAction, ROOT_STEP_INDEX};

/// Tag carrying the plan fingerprint.
pub const PLAN_TAG: &str = "vnet-provisioner-plan";

/// Tag carrying the run identifier.
pub const RUN_TAG: &str = "vnet-provisioner-run";

/// Tag carrying the host that started the run.
pub const HOST_TAG: &str = "vnet-provisioner-host";

/// Step index reported for a failed teardown.
const TEARDOWN_STEP_INDEX: usize = 0;

/// Maximum length of a Linux computer name.
const MAX_COMPUTER_NAME_LEN: usize = 64;

/// Orchestrator for provisioning runs.
#[derive(Debug)]
pub struct Orchestrator<'a, A: ResourceApi + ?Sized> {
    /// Resource manager the run talks to.
    api: &'a A,
}

impl<'a, A: ResourceApi + ?Sized> Orchestrator<'a, A> {
    /// Creates a new orchestrator.
    #[must_use]
    pub const fn new(api: &'a A) -> Self {
        Self { api }
    }

    /// Runs a plan and tears down everything it created.
    ///
    /// Never fails: step and teardown errors are recorded in the report.
    pub async fn run(&self, plan: &ProvisioningPlan) -> RunReport {
        let started_at = Utc::now();
        let mut ctx = RunContext::new();
        let mut records = Vec::with_capacity(plan.step_count());

        info!(
            "Starting run {} with {} steps in {}",
            ctx.run_id(),
            plan.step_count(),
            plan.location
        );

        let failure = self.provision(plan, &mut ctx, &mut records).await.err();
        if let Some(e) = &failure {
            error!("{e}");
        }

        let recorded = records.len();
        for step in plan.steps.iter().skip(recorded.saturating_sub(ROOT_STEP_INDEX)) {
            debug!("Skipping step {}", step.index);
            records.push(StepRecord {
                index: step.index,
                description: step.description(),
                status: StepStatus::Skipped,
                detail: Vec::new(),
                duration_ms: 0,
            });
        }

        let teardown = match self.teardown(&mut ctx).await {
            Ok(name) => TeardownRecord::Deleted { name },
            Err(RunError::NotProvisioned) => {
                info!("{}", RunError::NotProvisioned);
                TeardownRecord::NotProvisioned
            }
            Err(e) => {
                error!("{e}");
                TeardownRecord::Failed {
                    message: e.to_string(),
                }
            }
        };

        RunReport {
            run_id: ctx.run_id(),
            plan_fingerprint: plan.fingerprint.clone(),
            resource_group: plan.root.name.clone(),
            started_at,
            finished_at: Utc::now(),
            phases: ctx.phases().to_vec(),
            steps: records,
            failure,
            teardown,
        }
    }

    /// Creates the resource group and runs every step, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the failure of the first step that did not succeed.
    pub async fn provision(
        &self,
        plan: &ProvisioningPlan,
        ctx: &mut RunContext,
        records: &mut Vec<StepRecord>,
    ) -> std::result::Result<(), RunError> {
        let description = plan.root.description();
        let started = Instant::now();

        let root_id = match self.create_root(plan, ctx).await {
            Ok(handle) => {
                info!("Created a resource group with name: {}", handle.name());
                records.push(record(ROOT_STEP_INDEX, description, started, Vec::new()));
                let id = handle.id.clone();
                ctx.set_root(handle);
                id
            }
            Err(e) => {
                let failure = RunError::step_failure(ROOT_STEP_INDEX, &description, e);
                records.push(failed(ROOT_STEP_INDEX, description, started, &failure));
                return Err(failure);
            }
        };

        ctx.advance(RunPhase::StepsExecuting);

        for step in &plan.steps {
            let description = step.description();
            debug!("Step {}: {description}", step.index);
            let started = Instant::now();

            match self.execute_step(plan, step, &root_id, ctx).await {
                Ok(detail) => records.push(record(step.index, description, started, detail)),
                Err(e) => {
                    let failure = RunError::step_failure(step.index, &description, e);
                    records.push(failed(step.index, description, started, &failure));
                    ctx.advance(RunPhase::Aborted);
                    return Err(failure);
                }
            }
        }

        ctx.advance(RunPhase::Completed);
        Ok(())
    }

    /// Deletes the resource group, if one was created.
    ///
    /// Takes the resource group out of the context, so a second call
    /// returns [`RunError::NotProvisioned`].
    ///
    /// # Errors
    ///
    /// Returns [`RunError::NotProvisioned`] if there is nothing to delete,
    /// or a step failure if the delete call fails.
    pub async fn teardown(&self, ctx: &mut RunContext) -> std::result::Result<String, RunError> {
        let Some(root) = ctx.take_root() else {
            return Err(RunError::NotProvisioned);
        };

        let name = root.name().to_string();
        info!("Deleting Resource Group: {name}");

        match self.api.delete(&root).await {
            Ok(()) => {
                ctx.advance(RunPhase::TornDown);
                info!("Deleted Resource Group: {name}");
                Ok(name)
            }
            Err(e) => {
                warn!("Resource group {} may still exist", root.id);
                Err(RunError::step_failure(
                    TEARDOWN_STEP_INDEX,
                    format!("delete {} '{name}'", ResourceKind::ResourceGroup),
                    e,
                ))
            }
        }
    }

    async fn create_root(&self, plan: &ProvisioningPlan, ctx: &RunContext) -> Result<ResourceHandle> {
        let mut tags = plan.root.tags.clone();
        tags.extend(run_tags(&plan.fingerprint, &ctx.run_id().to_string()));

        let config = ResourceConfig::ResourceGroup {
            location: plan.location.clone(),
            tags,
        };

        self.api
            .create_or_update(
                &self.api.subscription(),
                ResourceKind::ResourceGroup,
                &plan.root.name,
                &config,
            )
            .await
    }

    /// Runs one step and returns lines describing its outcome.
    async fn execute_step(
        &self,
        plan: &ProvisioningPlan,
        step: &PlannedStep,
        root_id: &ResourceId,
        ctx: &mut RunContext,
    ) -> Result<Vec<String>> {
        let location = &plan.location;

        match &step.action {
            StepAction::CreateOrUpdateSecurityGroup { logical, name, rules } => {
                let config = ResourceConfig::NetworkSecurityGroup {
                    location: location.clone(),
                    security_rules: rules.clone(),
                };
                let handle = self
                    .api
                    .create_or_update(root_id, ResourceKind::NetworkSecurityGroup, name, &config)
                    .await?;

                info!("Created network security group: {}", handle.name());
                let detail = vec![format!("security rules: {}", rules.len())];
                ctx.insert(ResourceKind::NetworkSecurityGroup, logical, handle);
                Ok(detail)
            }
            StepAction::CreateOrUpdateNetwork {
                logical,
                name,
                address_prefixes,
                subnets,
                update,
            } => {
                let config = ResourceConfig::VirtualNetwork {
                    location: location.clone(),
                    address_prefixes: address_prefixes.clone(),
                    subnets: resolve_subnets(subnets, ctx)?,
                };
                let handle = self
                    .api
                    .create_or_update(root_id, ResourceKind::VirtualNetwork, name, &config)
                    .await?;

                if *update {
                    info!("Updated a virtual network: {}", handle.name());
                } else {
                    info!("Created a virtual network: {}", handle.name());
                }

                let mut detail = Vec::new();
                for subnet in subnets.iter().filter(|s| s.network_security_group.is_some()) {
                    if let Some(nsg) = handle
                        .subnet(&subnet.name)
                        .and_then(|s| s.network_security_group)
                    {
                        info!("vnet connected nsg: {}", nsg.name());
                        detail.push(format!("subnet {} -> {}", subnet.name, nsg.name()));
                    }
                }

                ctx.insert(ResourceKind::VirtualNetwork, logical, handle);
                Ok(detail)
            }
            StepAction::CreateVirtualMachine {
                logical,
                name,
                network,
                subnet,
                size,
                image,
                admin_username,
                admin_password,
                public_ip,
            } => {
                let network_handle = ctx
                    .handle(ResourceKind::VirtualNetwork, network)
                    .ok_or_else(|| missing_handle(ResourceKind::VirtualNetwork, network))?;
                let subnet_id = network_handle
                    .subnet(subnet)
                    .and_then(|s| s.id)
                    .unwrap_or_else(|| network_handle.id.subnet(subnet));

                let mut detail = Vec::new();

                let public_ip = if *public_ip {
                    let pip = self
                        .api
                        .create_or_update(
                            root_id,
                            ResourceKind::PublicIpAddress,
                            &format!("{name}-pip"),
                            &ResourceConfig::PublicIpAddress {
                                location: location.clone(),
                            },
                        )
                        .await?;
                    detail.push(format!("public IP {}", pip.name()));
                    Some(pip.id)
                } else {
                    None
                };

                let nic = self
                    .api
                    .create_or_update(
                        root_id,
                        ResourceKind::NetworkInterface,
                        &format!("{name}-nic"),
                        &ResourceConfig::NetworkInterface {
                            location: location.clone(),
                            subnet: subnet_id,
                            public_ip,
                        },
                    )
                    .await?;
                detail.push(format!("network interface {}", nic.name()));

                let config = ResourceConfig::VirtualMachine {
                    location: location.clone(),
                    computer_name: computer_name(name),
                    size: size.clone(),
                    image: image.clone(),
                    admin_username: admin_username.clone(),
                    admin_password: admin_password.clone(),
                    network_interface: nic.id,
                };
                let handle = self
                    .api
                    .create_or_update(root_id, ResourceKind::VirtualMachine, name, &config)
                    .await?;

                info!("Created VM: {}", handle.name());
                ctx.insert(ResourceKind::VirtualMachine, logical, handle);
                Ok(detail)
            }
            StepAction::ListNetworks => {
                info!("Get all virtual network under {}", root_id.name());
                let networks = self
                    .api
                    .list_children(root_id, ResourceKind::VirtualNetwork)
                    .await?;

                let names: Vec<String> = networks.iter().map(|n| n.name().to_string()).collect();
                for name in &names {
                    info!("\t{name}");
                }
                Ok(names)
            }
            StepAction::DeleteNetwork { logical, name } => {
                let handle = ctx
                    .remove(ResourceKind::VirtualNetwork, logical)
                    .ok_or_else(|| missing_handle(ResourceKind::VirtualNetwork, logical))?;

                info!("Deleting virtual network: {name}");
                self.api.delete(&handle).await?;
                info!("Deleted virtual network: {}", handle.name());
                Ok(Vec::new())
            }
        }
    }
}

/// Replaces logical security group names with the ids of their handles.
fn resolve_subnets(subnets: &[PlannedSubnet], ctx: &RunContext) -> Result<Vec<SubnetData>> {
    subnets
        .iter()
        .map(|s| {
            let network_security_group = match &s.network_security_group {
                Some(logical) => Some(
                    ctx.handle(ResourceKind::NetworkSecurityGroup, logical)
                        .ok_or_else(|| missing_handle(ResourceKind::NetworkSecurityGroup, logical))?
                        .id
                        .clone(),
                ),
                None => None,
            };

            Ok(SubnetData {
                name: s.name.clone(),
                address_prefix: s.address_prefix.clone(),
                network_security_group,
            })
        })
        .collect()
}

fn missing_handle(kind: ResourceKind, logical: &str) -> VnetError {
    VnetError::internal(format!("no {kind} named '{logical}' was created by an earlier step"))
}

fn record(index: usize, description: String, started: Instant, detail: Vec<String>) -> StepRecord {
    StepRecord {
        index,
        description,
        status: StepStatus::Succeeded,
        detail,
        duration_ms: elapsed_ms(started),
    }
}

fn failed(index: usize, description: String, started: Instant, failure: &RunError) -> StepRecord {
    let cause = match failure {
        RunError::StepFailure { source, .. } => source.to_string(),
        RunError::NotProvisioned => failure.to_string(),
    };

    StepRecord {
        index,
        description,
        status: StepStatus::Failed,
        detail: vec![cause],
        duration_ms: elapsed_ms(started),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Guest host name for a VM: hostname characters only, bounded length.
fn computer_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .take(MAX_COMPUTER_NAME_LEN)
        .collect::<String>()
        .trim_end_matches('-')
        .to_string()
}

fn host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| String::from("unknown"))
}

/// Tags stamped on the resource group of every run.
fn run_tags(fingerprint: &str, run_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (PLAN_TAG.to_string(), fingerprint.to_string()),
        (RUN_TAG.to_string(), run_id.to_string()),
        (HOST_TAG.to_string(), host_name()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::MockResourceApi;
    use crate::config::ConfigParser;
    use crate::error::AzureError;
    use crate::planner::NameGenerator;
    use crate::testing::{Call, InMemoryResourceApi};

    const SCENARIO: &str = r#"
resource_group:
  name: rg1
randomize_names: false
steps:
  - action: create_network_security_group
    name: nsg1
    rules:
      - { name: DenyInternetInComing, source_address_prefix: INTERNET, access: deny, priority: 100, direction: inbound }
      - { name: DenyInternetOutGoing, destination_address_prefix: internet, access: deny, priority: 200, direction: outbound }
  - action: create_or_update_virtual_network
    name: vnet1
    address_prefixes: [192.168.0.0/16]
    subnets:
      - { name: subnet1, address_prefix: 192.168.1.0/24 }
      - { name: besubnet, address_prefix: 192.168.2.0/24, network_security_group: nsg1 }
  - action: create_or_update_virtual_network
    name: vnet2
    address_prefixes: [10.10.0.0/16]
    subnets:
      - { name: default, address_prefix: 10.10.1.0/24 }
  - action: list_virtual_networks
  - action: delete_virtual_network
    name: vnet2
  - action: list_virtual_networks
"#;

    fn plan(yaml: &str) -> ProvisioningPlan {
        let config = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        ProvisioningPlan::from_config(&config, &NameGenerator::new(false)).unwrap()
    }

    fn statuses(report: &RunReport) -> Vec<StepStatus> {
        report.steps.iter().map(|s| s.status).collect()
    }

    #[tokio::test]
    async fn test_full_run_leaves_nothing_behind() {
        let api = InMemoryResourceApi::new();
        let report = Orchestrator::new(&api).run(&plan(SCENARIO)).await;

        tokio_test::assert_ok!(report.result());
        assert_eq!(statuses(&report), vec![StepStatus::Succeeded; 7]);
        assert_eq!(report.steps[2].detail, vec!["subnet besubnet -> nsg1"]);
        assert_eq!(report.steps[4].detail, vec!["vnet1", "vnet2"]);
        assert_eq!(report.steps[6].detail, vec!["vnet1"]);
        assert_eq!(report.teardown, TeardownRecord::Deleted { name: String::from("rg1") });
        assert_eq!(
            report.phases,
            vec![
                RunPhase::NotStarted,
                RunPhase::RootScopeCreated,
                RunPhase::StepsExecuting,
                RunPhase::Completed,
                RunPhase::TornDown,
            ]
        );

        assert!(api.resource_names().is_empty());
        assert_eq!(api.delete_calls(ResourceKind::ResourceGroup), 1);

        let calls = api.calls();
        let vnet2_deleted = calls.iter().position(|c| {
            *c == Call::Delete { kind: ResourceKind::VirtualNetwork, name: String::from("vnet2") }
        });
        let rg_deleted = calls.iter().position(|c| {
            *c == Call::Delete { kind: ResourceKind::ResourceGroup, name: String::from("rg1") }
        });
        assert!(vnet2_deleted.is_some());
        assert!(vnet2_deleted < rg_deleted);
        assert_eq!(rg_deleted, Some(calls.len() - 1));
    }

    #[tokio::test]
    async fn test_failed_step_skips_the_rest_and_tears_down() {
        let api = InMemoryResourceApi::new();
        api.fail_create(ResourceKind::NetworkSecurityGroup);

        let report = Orchestrator::new(&api).run(&plan(SCENARIO)).await;

        assert!(matches!(
            report.result(),
            Err(RunError::StepFailure { index: 2, .. })
        ));
        assert_eq!(
            statuses(&report),
            vec![
                StepStatus::Succeeded,
                StepStatus::Failed,
                StepStatus::Skipped,
                StepStatus::Skipped,
                StepStatus::Skipped,
                StepStatus::Skipped,
                StepStatus::Skipped,
            ]
        );
        assert_eq!(
            api.calls(),
            vec![
                Call::CreateOrUpdate { kind: ResourceKind::ResourceGroup, name: String::from("rg1") },
                Call::CreateOrUpdate { kind: ResourceKind::NetworkSecurityGroup, name: String::from("nsg1") },
                Call::Delete { kind: ResourceKind::ResourceGroup, name: String::from("rg1") },
            ]
        );
        assert_eq!(report.phases.last(), Some(&RunPhase::TornDown));
        assert!(report.phases.contains(&RunPhase::Aborted));
        assert!(api.resource_names().is_empty());
    }

    #[tokio::test]
    async fn test_root_failure_skips_teardown() {
        let api = InMemoryResourceApi::new();
        api.fail_create(ResourceKind::ResourceGroup);

        let report = Orchestrator::new(&api).run(&plan(SCENARIO)).await;

        assert!(matches!(
            report.result(),
            Err(RunError::StepFailure { index: 1, .. })
        ));
        assert_eq!(report.teardown, TeardownRecord::NotProvisioned);
        assert_eq!(report.phases, vec![RunPhase::NotStarted]);
        assert_eq!(report.count(StepStatus::Skipped), 6);
        assert_eq!(api.calls().len(), 1);
        assert!(report.cleaned_up());
    }

    #[tokio::test]
    async fn test_teardown_twice() {
        let api = InMemoryResourceApi::new();
        let orchestrator = Orchestrator::new(&api);
        let mut ctx = RunContext::new();
        let mut records = Vec::new();

        tokio_test::assert_ok!(orchestrator.provision(&plan(SCENARIO), &mut ctx, &mut records).await);

        assert_eq!(orchestrator.teardown(&mut ctx).await.unwrap(), "rg1");
        let second = orchestrator.teardown(&mut ctx).await.unwrap_err();
        assert!(second.is_benign());
        assert_eq!(api.delete_calls(ResourceKind::ResourceGroup), 1);
    }

    #[tokio::test]
    async fn test_teardown_failure_is_reported_not_raised() {
        let api = InMemoryResourceApi::new();
        api.fail_delete(ResourceKind::ResourceGroup);

        let report = Orchestrator::new(&api).run(&plan(SCENARIO)).await;

        tokio_test::assert_ok!(report.result());
        assert!(matches!(report.teardown, TeardownRecord::Failed { .. }));
        assert!(!report.cleaned_up());
        assert_eq!(report.phases.last(), Some(&RunPhase::Completed));
    }

    #[tokio::test]
    async fn test_virtual_machine_step() {
        let api = InMemoryResourceApi::new();
        let report = Orchestrator::new(&api)
            .run(&plan(
                r"
resource_group: { name: rg1 }
randomize_names: false
steps:
  - action: create_or_update_virtual_network
    name: vnet1
    address_prefixes: [192.168.0.0/16]
    subnets: [{ name: fesubnet, address_prefix: 192.168.3.0/24 }]
  - { action: create_virtual_machine, name: fevm, virtual_network: vnet1, subnet: fesubnet, public_ip: true }
",
            ))
            .await;

        tokio_test::assert_ok!(report.result());
        assert_eq!(report.steps[2].detail, vec!["public IP fevm-pip", "network interface fevm-nic"]);

        let created: Vec<_> = api
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::CreateOrUpdate { kind, .. } => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            created,
            vec![
                ResourceKind::ResourceGroup,
                ResourceKind::VirtualNetwork,
                ResourceKind::PublicIpAddress,
                ResourceKind::NetworkInterface,
                ResourceKind::VirtualMachine,
            ]
        );
    }

    #[tokio::test]
    async fn test_root_is_tagged_with_run() {
        let api = InMemoryResourceApi::new();
        let orchestrator = Orchestrator::new(&api);
        let plan = plan(SCENARIO);
        let mut ctx = RunContext::new();

        orchestrator.provision(&plan, &mut ctx, &mut Vec::new()).await.unwrap();

        let root = ctx.root().unwrap();
        assert_eq!(root.tags.get(PLAN_TAG), Some(&plan.fingerprint));
        assert_eq!(root.tags.get(RUN_TAG), Some(&ctx.run_id().to_string()));
        assert!(root.tags.contains_key(HOST_TAG));

        orchestrator.teardown(&mut ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_throttled_list_aborts_with_single_teardown() {
        let mut api = MockResourceApi::new();
        api.expect_subscription()
            .returning(|| ResourceId::subscription("sub"));
        api.expect_create_or_update()
            .times(1)
            .returning(|scope, kind, name, _| {
                Ok(ResourceHandle {
                    id: scope.child(kind, name),
                    kind,
                    location: None,
                    tags: BTreeMap::new(),
                    properties: serde_json::json!({ "provisioningState": "Succeeded" }),
                })
            });
        api.expect_list_children()
            .times(1)
            .returning(|_, _| Err(AzureError::Throttled { retry_after_secs: 5 }.into()));
        api.expect_delete()
            .times(1)
            .withf(|handle| handle.kind == ResourceKind::ResourceGroup)
            .returning(|_| Ok(()));

        let report = Orchestrator::new(&api)
            .run(&plan(
                "resource_group: { name: rg1 }\nrandomize_names: false\nsteps:\n  - action: list_virtual_networks\n",
            ))
            .await;

        assert!(matches!(
            report.result(),
            Err(RunError::StepFailure { index: 2, .. })
        ));
        assert_eq!(report.teardown, TeardownRecord::Deleted { name: String::from("rg1") });
    }

    #[test]
    fn test_computer_name() {
        assert_eq!(computer_name("fevm-1a2b3c"), "fevm-1a2b3c");
        assert_eq!(computer_name("web_vm.1"), "web-vm-1");
        assert_eq!(computer_name(&"a".repeat(80)).len(), MAX_COMPUTER_NAME_LEN);
    }
}
