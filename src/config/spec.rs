//! Plan file specification types.
//!
//! This module defines all the structs that map to the `vnet.plan.yaml` file.
//! A plan names a resource group and an ordered list of steps run inside it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use crate::azure::{ImageReference, SecurityRule};

/// The root structure of a plan file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanConfig {
    /// Azure region every resource is created in.
    #[serde(default = "default_location")]
    pub location: String,
    /// Append a random suffix to every physical resource name.
    #[serde(default = "default_randomize_names")]
    pub randomize_names: bool,
    /// The resource group owning every created resource.
    pub resource_group: ResourceGroupConfig,
    /// Azure endpoints and polling behaviour.
    #[serde(default)]
    pub azure: AzureSettings,
    /// Ordered steps run after the resource group exists.
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

/// Resource group configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceGroupConfig {
    /// Logical name of the group.
    pub name: String,
    /// Extra tags applied to the group.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Azure endpoint and long-running operation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AzureSettings {
    /// Resource Manager endpoint.
    #[serde(default = "default_management_endpoint")]
    pub management_endpoint: String,
    /// Azure AD authority host.
    #[serde(default = "default_authority_host")]
    pub authority_host: String,
    /// Seconds between polls when ARM gives no `Retry-After`.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Upper bound in seconds on a single long-running operation.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,
}

impl Default for AzureSettings {
    fn default() -> Self {
        Self {
            management_endpoint: default_management_endpoint(),
            authority_host: default_authority_host(),
            poll_interval_secs: default_poll_interval(),
            operation_timeout_secs: default_operation_timeout(),
        }
    }
}

/// A single plan step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepConfig {
    /// Create a network security group.
    CreateNetworkSecurityGroup(SecurityGroupConfig),
    /// Create a virtual network, or replace it if an earlier step created it.
    CreateOrUpdateVirtualNetwork(VirtualNetworkConfig),
    /// Create a virtual machine in an existing subnet.
    CreateVirtualMachine(VirtualMachineConfig),
    /// List the virtual networks in the resource group.
    ListVirtualNetworks,
    /// Delete a virtual network created by an earlier step.
    DeleteVirtualNetwork {
        /// Logical name of the network.
        name: String,
    },
}

/// Network security group configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityGroupConfig {
    /// Logical name.
    pub name: String,
    /// Security rules.
    #[serde(default)]
    pub rules: Vec<SecurityRule>,
}

/// Virtual network configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VirtualNetworkConfig {
    /// Logical name.
    pub name: String,
    /// Address space in CIDR notation.
    pub address_prefixes: Vec<String>,
    /// Complete subnet list; an update replaces the previous list.
    #[serde(default)]
    pub subnets: Vec<SubnetConfig>,
}

/// Subnet configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubnetConfig {
    /// Subnet name.
    pub name: String,
    /// Address prefix in CIDR notation.
    pub address_prefix: String,
    /// Logical name of a security group created by an earlier step.
    #[serde(default)]
    pub network_security_group: Option<String>,
}

/// Virtual machine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VirtualMachineConfig {
    /// Logical name.
    pub name: String,
    /// Logical name of the network holding the subnet.
    pub virtual_network: String,
    /// Subnet the network interface is placed in.
    pub subnet: String,
    /// VM size.
    #[serde(default = "default_vm_size")]
    pub size: String,
    /// OS image.
    #[serde(default)]
    pub image: ImageReference,
    /// Administrator user name.
    #[serde(default = "default_admin_username")]
    pub admin_username: String,
    /// Administrator password; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_password: Option<String>,
    /// Attach a static public IP address.
    #[serde(default)]
    pub public_ip: bool,
}

/// Service principal credentials read from the environment.
#[derive(Clone, PartialEq, Eq)]
pub struct AzureCredentials {
    /// Application (client) id.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
    /// Directory (tenant) id.
    pub tenant_id: String,
    /// Subscription resources are created in.
    pub subscription_id: String,
}

impl fmt::Debug for AzureCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("tenant_id", &self.tenant_id)
            .field("subscription_id", &self.subscription_id)
            .finish()
    }
}

/// An IPv4 network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    /// Network address with host bits cleared.
    pub network: u32,
    /// Prefix length.
    pub prefix_len: u8,
}

impl Ipv4Cidr {
    /// Parses a prefix like `192.168.1.0/24`.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix is malformed or has host bits set.
    pub fn parse(s: &str) -> Result<Self, String> {
        let (addr, len) = s
            .split_once('/')
            .ok_or_else(|| format!("Invalid prefix format: {s}. Expected format: A.B.C.D/N"))?;

        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| format!("Invalid IPv4 address: {addr}"))?;
        let prefix_len: u8 = len
            .parse()
            .ok()
            .filter(|l| *l <= 32)
            .ok_or_else(|| format!("Invalid prefix length: {len}"))?;

        let network = u32::from(addr);
        if network & !Self::mask(prefix_len) != 0 {
            return Err(format!("Prefix {s} has host bits set"));
        }

        Ok(Self {
            network,
            prefix_len,
        })
    }

    const fn mask(prefix_len: u8) -> u32 {
        if prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - prefix_len)
        }
    }

    const fn last(self) -> u32 {
        self.network | !Self::mask(self.prefix_len)
    }

    /// Returns true if `other` lies entirely inside this network.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        other.network >= self.network && other.last() <= self.last()
    }

    /// Returns true if the two networks share any address.
    #[must_use]
    pub const fn overlaps(self, other: Self) -> bool {
        self.network <= other.last() && other.network <= self.last()
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", Ipv4Addr::from(self.network), self.prefix_len)
    }
}

// Default value functions

const fn default_randomize_names() -> bool {
    true
}

const fn default_poll_interval() -> u64 {
    5
}

const fn default_operation_timeout() -> u64 {
    3600
}

fn default_location() -> String {
    String::from("eastus")
}

fn default_management_endpoint() -> String {
    String::from("https://management.azure.com")
}

fn default_authority_host() -> String {
    String::from("https://login.microsoftonline.com")
}

fn default_vm_size() -> String {
    String::from("Standard_B1s")
}

fn default_admin_username() -> String {
    String::from("azureuser")
}

impl StepConfig {
    /// Returns the logical name of the resource the step acts on, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::CreateNetworkSecurityGroup(nsg) => Some(&nsg.name),
            Self::CreateOrUpdateVirtualNetwork(vnet) => Some(&vnet.name),
            Self::CreateVirtualMachine(vm) => Some(&vm.name),
            Self::ListVirtualNetworks => None,
            Self::DeleteVirtualNetwork { name } => Some(name),
        }
    }

    /// Returns the action name as written in the plan file.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::CreateNetworkSecurityGroup(_) => "create_network_security_group",
            Self::CreateOrUpdateVirtualNetwork(_) => "create_or_update_virtual_network",
            Self::CreateVirtualMachine(_) => "create_virtual_machine",
            Self::ListVirtualNetworks => "list_virtual_networks",
            Self::DeleteVirtualNetwork { .. } => "delete_virtual_network",
        }
    }
}

impl PlanConfig {
    /// Returns the logical names of every security group the plan creates.
    #[must_use]
    pub fn security_group_names(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter_map(|s| match s {
                StepConfig::CreateNetworkSecurityGroup(nsg) => Some(nsg.name.as_str()),
                _ => None,
            })
            .collect()
    }
}
