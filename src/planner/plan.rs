//! Provisioning plan types and construction.
//!
//! This module turns a plan file into an ordered list of steps with
//! physical names, checking that every step only references resources
//! created by an earlier step.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::debug;

use crate::azure::{ImageReference, ResourceKind, SecurityRule};
use crate::config::{PlanConfig, PlanHasher, StepConfig, VirtualMachineConfig};
use crate::error::{PlanError, Result};

use super::names::{generate_password, NameGenerator};

/// Step index of the resource group.
pub const ROOT_STEP_INDEX: usize = 1;

/// A complete provisioning plan.
#[derive(Debug, Clone)]
pub struct ProvisioningPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Fingerprint of the plan file this plan is based on.
    pub fingerprint: String,
    /// Azure region of every resource.
    pub location: String,
    /// The resource group owning every created resource.
    pub root: RootScopeSpec,
    /// Steps in execution order, numbered from 2.
    pub steps: Vec<PlannedStep>,
}

/// The resource group of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootScopeSpec {
    /// Physical name.
    pub name: String,
    /// Tags from the plan file.
    pub tags: BTreeMap<String, String>,
}

/// A single planned step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    /// Position in the run; the resource group is step 1.
    pub index: usize,
    /// What the step does.
    pub action: StepAction,
}

/// A subnet with its security group given by logical name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSubnet {
    /// Subnet name.
    pub name: String,
    /// Address prefix in CIDR notation.
    pub address_prefix: String,
    /// Logical name of the attached security group.
    pub network_security_group: Option<String>,
}

/// The action performed by a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Create or update a network security group.
    CreateOrUpdateSecurityGroup {
        /// Logical name.
        logical: String,
        /// Physical name.
        name: String,
        /// Security rules.
        rules: Vec<SecurityRule>,
    },
    /// Create or update a virtual network.
    CreateOrUpdateNetwork {
        /// Logical name.
        logical: String,
        /// Physical name.
        name: String,
        /// Address space.
        address_prefixes: Vec<String>,
        /// Complete subnet list.
        subnets: Vec<PlannedSubnet>,
        /// True if an earlier step already created this network.
        update: bool,
    },
    /// Create a virtual machine with its network interface.
    CreateVirtualMachine {
        /// Logical name.
        logical: String,
        /// Physical name.
        name: String,
        /// Logical name of the network holding the subnet.
        network: String,
        /// Subnet name.
        subnet: String,
        /// VM size.
        size: String,
        /// OS image.
        image: ImageReference,
        /// Administrator user name.
        admin_username: String,
        /// Administrator password.
        admin_password: String,
        /// Attach a static public IP address.
        public_ip: bool,
    },
    /// List the virtual networks in the resource group.
    ListNetworks,
    /// Delete a virtual network.
    DeleteNetwork {
        /// Logical name.
        logical: String,
        /// Physical name.
        name: String,
    },
}

impl StepAction {
    /// Returns the kind of resource the step acts on.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::CreateOrUpdateSecurityGroup { .. } => ResourceKind::NetworkSecurityGroup,
            Self::CreateOrUpdateNetwork { .. } | Self::ListNetworks | Self::DeleteNetwork { .. } => {
                ResourceKind::VirtualNetwork
            }
            Self::CreateVirtualMachine { .. } => ResourceKind::VirtualMachine,
        }
    }

    /// Returns the physical name of the resource the step acts on, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::CreateOrUpdateSecurityGroup { name, .. }
            | Self::CreateOrUpdateNetwork { name, .. }
            | Self::CreateVirtualMachine { name, .. }
            | Self::DeleteNetwork { name, .. } => Some(name),
            Self::ListNetworks => None,
        }
    }

    /// Returns the verb shown for this step.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::CreateOrUpdateNetwork { update: true, .. } => "update",
            Self::ListNetworks => "list",
            Self::DeleteNetwork { .. } => "delete",
            _ => "create",
        }
    }
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} {} '{name}'", self.verb(), self.kind()),
            None => write!(f, "{} {}s", self.verb(), self.kind()),
        }
    }
}

impl PlannedStep {
    /// Returns a human-readable description of the step.
    #[must_use]
    pub fn description(&self) -> String {
        self.action.to_string()
    }
}

impl fmt::Display for PlannedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. {}", self.index, self.action)
    }
}

impl RootScopeSpec {
    /// Returns a human-readable description of the root step.
    #[must_use]
    pub fn description(&self) -> String {
        format!("create {} '{}'", ResourceKind::ResourceGroup, self.name)
    }
}

/// What the planner knows about a network while walking the steps.
#[derive(Debug)]
struct NetworkState {
    subnets: HashSet<String>,
    deleted: bool,
}

/// Tracks definitions while walking the steps in order.
struct Resolver<'a> {
    /// Step index of the first definition of each (kind, logical name).
    first_definition: HashMap<(ResourceKind, String), usize>,
    security_groups: HashSet<&'a str>,
    networks: HashMap<&'a str, NetworkState>,
    machines: HashSet<&'a str>,
}

impl<'a> Resolver<'a> {
    fn new(steps: &'a [StepConfig]) -> Self {
        let mut first_definition = HashMap::new();

        for (i, step) in steps.iter().enumerate() {
            let kind = match step {
                StepConfig::CreateNetworkSecurityGroup(_) => ResourceKind::NetworkSecurityGroup,
                StepConfig::CreateOrUpdateVirtualNetwork(_) => ResourceKind::VirtualNetwork,
                StepConfig::CreateVirtualMachine(_) => ResourceKind::VirtualMachine,
                StepConfig::ListVirtualNetworks | StepConfig::DeleteVirtualNetwork { .. } => {
                    continue;
                }
            };
            if let Some(name) = step.name() {
                first_definition
                    .entry((kind, name.to_string()))
                    .or_insert(i + ROOT_STEP_INDEX + 1);
            }
        }

        Self {
            first_definition,
            security_groups: HashSet::new(),
            networks: HashMap::new(),
            machines: HashSet::new(),
        }
    }

    /// Builds the error for a reference to something not yet defined.
    fn missing(&self, step: usize, kind: ResourceKind, reference: &str) -> PlanError {
        match self.first_definition.get(&(kind, reference.to_string())) {
            Some(&defined_at) if defined_at > step => PlanError::ForwardReference {
                step,
                reference: reference.to_string(),
                defined_at,
            },
            _ => PlanError::UnresolvedReference {
                step,
                resource_type: kind.to_string(),
                reference: reference.to_string(),
            },
        }
    }

    /// Returns a network that exists at `step`.
    fn live_network(
        &self,
        step: usize,
        name: &str,
    ) -> std::result::Result<&NetworkState, PlanError> {
        self.networks
            .get(name)
            .filter(|n| !n.deleted)
            .ok_or_else(|| self.missing(step, ResourceKind::VirtualNetwork, name))
    }
}

/// Physical names handed out so far, so updates reuse the original name.
struct PhysicalNames<'a> {
    generator: &'a NameGenerator,
    assigned: HashMap<(ResourceKind, String), String>,
}

impl PhysicalNames<'_> {
    fn get(&mut self, kind: ResourceKind, logical: &str) -> String {
        self.assigned
            .entry((kind, logical.to_string()))
            .or_insert_with(|| self.generator.physical(logical))
            .clone()
    }
}

impl ProvisioningPlan {
    /// Builds a plan from a plan file.
    ///
    /// # Errors
    ///
    /// Returns an error if the plan has no steps, declares a resource twice,
    /// or references a resource no earlier step creates.
    pub fn from_config(config: &PlanConfig, names: &NameGenerator) -> Result<Self> {
        if config.steps.is_empty() {
            return Err(PlanError::EmptyPlan.into());
        }

        let mut resolver = Resolver::new(&config.steps);
        let mut physical = PhysicalNames {
            generator: names,
            assigned: HashMap::new(),
        };
        let mut steps = Vec::with_capacity(config.steps.len());

        for (i, step) in config.steps.iter().enumerate() {
            let index = i + ROOT_STEP_INDEX + 1;

            let action = match step {
                StepConfig::CreateNetworkSecurityGroup(nsg) => {
                    if !resolver.security_groups.insert(&nsg.name) {
                        return Err(duplicate(ResourceKind::NetworkSecurityGroup, &nsg.name));
                    }

                    StepAction::CreateOrUpdateSecurityGroup {
                        logical: nsg.name.clone(),
                        name: physical.get(ResourceKind::NetworkSecurityGroup, &nsg.name),
                        rules: nsg.rules.clone(),
                    }
                }
                StepConfig::CreateOrUpdateVirtualNetwork(vnet) => {
                    for subnet in &vnet.subnets {
                        if let Some(nsg) = &subnet.network_security_group
                            && !resolver.security_groups.contains(nsg.as_str())
                        {
                            return Err(resolver
                                .missing(index, ResourceKind::NetworkSecurityGroup, nsg)
                                .into());
                        }
                    }

                    let update = resolver
                        .networks
                        .get(vnet.name.as_str())
                        .is_some_and(|n| !n.deleted);
                    resolver.networks.insert(
                        &vnet.name,
                        NetworkState {
                            subnets: vnet.subnets.iter().map(|s| s.name.clone()).collect(),
                            deleted: false,
                        },
                    );

                    StepAction::CreateOrUpdateNetwork {
                        logical: vnet.name.clone(),
                        name: physical.get(ResourceKind::VirtualNetwork, &vnet.name),
                        address_prefixes: vnet.address_prefixes.clone(),
                        subnets: vnet
                            .subnets
                            .iter()
                            .map(|s| PlannedSubnet {
                                name: s.name.clone(),
                                address_prefix: s.address_prefix.clone(),
                                network_security_group: s.network_security_group.clone(),
                            })
                            .collect(),
                        update,
                    }
                }
                StepConfig::CreateVirtualMachine(vm) => {
                    if !resolver.machines.insert(&vm.name) {
                        return Err(duplicate(ResourceKind::VirtualMachine, &vm.name));
                    }

                    let network = resolver.live_network(index, &vm.virtual_network)?;
                    if !network.subnets.contains(&vm.subnet) {
                        return Err(PlanError::UnresolvedReference {
                            step: index,
                            resource_type: String::from("subnet"),
                            reference: format!("{}/{}", vm.virtual_network, vm.subnet),
                        }
                        .into());
                    }

                    machine_action(vm, physical.get(ResourceKind::VirtualMachine, &vm.name))
                }
                StepConfig::ListVirtualNetworks => StepAction::ListNetworks,
                StepConfig::DeleteVirtualNetwork { name } => {
                    resolver.live_network(index, name)?;
                    if let Some(network) = resolver.networks.get_mut(name.as_str()) {
                        network.deleted = true;
                    }

                    StepAction::DeleteNetwork {
                        logical: name.clone(),
                        name: physical.get(ResourceKind::VirtualNetwork, name),
                    }
                }
            };

            debug!("Planned step {index}: {action}");
            steps.push(PlannedStep { index, action });
        }

        Ok(Self {
            created_at: Utc::now(),
            fingerprint: PlanHasher::new().hash_plan(config),
            location: config.location.clone(),
            root: RootScopeSpec {
                name: names.physical(&config.resource_group.name),
                tags: config.resource_group.tags.clone(),
            },
            steps,
        })
    }

    /// Returns the number of steps including the resource group.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len() + 1
    }

    /// Returns the number of steps that create or change resources.
    #[must_use]
    pub fn mutating_step_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| !matches!(s.action, StepAction::ListNetworks))
            .count()
            + 1
    }
}

fn duplicate(kind: ResourceKind, name: &str) -> crate::error::VnetError {
    PlanError::DuplicateName {
        resource_type: kind.to_string(),
        name: name.to_string(),
    }
    .into()
}

fn machine_action(vm: &VirtualMachineConfig, name: String) -> StepAction {
    StepAction::CreateVirtualMachine {
        logical: vm.name.clone(),
        name,
        network: vm.virtual_network.clone(),
        subnet: vm.subnet.clone(),
        size: vm.size.clone(),
        image: vm.image.clone(),
        admin_username: vm.admin_username.clone(),
        admin_password: vm
            .admin_password
            .clone()
            .unwrap_or_else(generate_password),
        public_ip: vm.public_ip,
    }
}
