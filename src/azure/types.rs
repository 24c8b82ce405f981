//! Azure Resource Manager types and data structures.
//!
//! This module defines resource kinds, resource identifiers, the desired
//! configuration sent to ARM, and the handles returned from it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{AzureError, Result};

/// API version for `Microsoft.Resources`.
const RESOURCES_API_VERSION: &str = "2022-09-01";

/// API version for `Microsoft.Network`.
const NETWORK_API_VERSION: &str = "2023-09-01";

/// API version for `Microsoft.Compute`.
const COMPUTE_API_VERSION: &str = "2023-09-01";

/// Kinds of resources the provisioner manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Resource group (the root scope).
    ResourceGroup,
    /// Network security group.
    NetworkSecurityGroup,
    /// Virtual network.
    VirtualNetwork,
    /// Public IP address.
    PublicIpAddress,
    /// Network interface.
    NetworkInterface,
    /// Virtual machine.
    VirtualMachine,
}

impl ResourceKind {
    /// Returns the ARM provider namespace and type, e.g. `Microsoft.Network/virtualNetworks`.
    #[must_use]
    pub const fn provider_path(self) -> &'static str {
        match self {
            Self::ResourceGroup => "Microsoft.Resources/resourceGroups",
            Self::NetworkSecurityGroup => "Microsoft.Network/networkSecurityGroups",
            Self::VirtualNetwork => "Microsoft.Network/virtualNetworks",
            Self::PublicIpAddress => "Microsoft.Network/publicIPAddresses",
            Self::NetworkInterface => "Microsoft.Network/networkInterfaces",
            Self::VirtualMachine => "Microsoft.Compute/virtualMachines",
        }
    }

    /// Returns the API version used for this kind.
    #[must_use]
    pub const fn api_version(self) -> &'static str {
        match self {
            Self::ResourceGroup => RESOURCES_API_VERSION,
            Self::NetworkSecurityGroup
            | Self::VirtualNetwork
            | Self::PublicIpAddress
            | Self::NetworkInterface => NETWORK_API_VERSION,
            Self::VirtualMachine => COMPUTE_API_VERSION,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ResourceGroup => "resource group",
            Self::NetworkSecurityGroup => "network security group",
            Self::VirtualNetwork => "virtual network",
            Self::PublicIpAddress => "public IP address",
            Self::NetworkInterface => "network interface",
            Self::VirtualMachine => "virtual machine",
        };
        write!(f, "{s}")
    }
}

/// A fully qualified ARM resource identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Returns the identifier of a subscription.
    #[must_use]
    pub fn subscription(subscription_id: &str) -> Self {
        Self(format!("/subscriptions/{subscription_id}"))
    }

    /// Parses an identifier returned by ARM.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a subscription-scoped ARM id.
    pub fn parse(id: &str) -> Result<Self> {
        let trimmed = id.trim_end_matches('/');
        let mut segments = trimmed.split('/');
        let valid = segments.next() == Some("")
            && segments
                .next()
                .is_some_and(|s| s.eq_ignore_ascii_case("subscriptions"))
            && segments.next().is_some_and(|s| !s.is_empty());

        if valid {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(AzureError::invalid_response(format!("Malformed resource id: {id}")).into())
        }
    }

    /// Returns the identifier of a resource of `kind` named `name` under this scope.
    #[must_use]
    pub fn child(&self, kind: ResourceKind, name: &str) -> Self {
        match kind {
            ResourceKind::ResourceGroup => Self(format!("{}/resourceGroups/{name}", self.0)),
            _ => Self(format!("{}/providers/{}/{name}", self.0, kind.provider_path())),
        }
    }

    /// Returns the identifier of a subnet of this virtual network.
    #[must_use]
    pub fn subnet(&self, name: &str) -> Self {
        Self(format!("{}/subnets/{name}", self.0))
    }

    /// Returns the collection path listing resources of `kind` under this scope.
    #[must_use]
    pub fn collection(&self, kind: ResourceKind) -> String {
        match kind {
            ResourceKind::ResourceGroup => format!("{}/resourceGroups", self.0),
            _ => format!("{}/providers/{}", self.0, kind.provider_path()),
        }
    }

    /// Returns the last path segment (the resource name).
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// Returns true if `other` lives under this identifier.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        let prefix = format!("{}/", self.0.to_ascii_lowercase());
        other.0.to_ascii_lowercase().starts_with(&prefix)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Security rule protocol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuleProtocol {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
    /// ICMP.
    Icmp,
    /// Any protocol.
    #[default]
    #[serde(alias = "*")]
    Any,
}

/// Whether a rule allows or denies traffic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuleAccess {
    /// Allow matching traffic.
    Allow,
    /// Deny matching traffic.
    Deny,
}

/// Direction of traffic a rule applies to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RuleDirection {
    /// Incoming traffic.
    Inbound,
    /// Outgoing traffic.
    Outbound,
}

impl RuleProtocol {
    const fn as_arm(self) -> &'static str {
        match self {
            Self::Tcp => "Tcp",
            Self::Udp => "Udp",
            Self::Icmp => "Icmp",
            Self::Any => "*",
        }
    }
}

impl RuleAccess {
    const fn as_arm(self) -> &'static str {
        match self {
            Self::Allow => "Allow",
            Self::Deny => "Deny",
        }
    }
}

impl RuleDirection {
    const fn as_arm(self) -> &'static str {
        match self {
            Self::Inbound => "Inbound",
            Self::Outbound => "Outbound",
        }
    }
}

/// A network security group rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityRule {
    /// Rule name.
    pub name: String,
    /// Protocol matched.
    #[serde(default)]
    pub protocol: RuleProtocol,
    /// Source port or range.
    #[serde(default = "wildcard")]
    pub source_port_range: String,
    /// Destination port or range.
    #[serde(default = "wildcard")]
    pub destination_port_range: String,
    /// Source address prefix or service tag.
    #[serde(default = "wildcard")]
    pub source_address_prefix: String,
    /// Destination address prefix or service tag.
    #[serde(default = "wildcard")]
    pub destination_address_prefix: String,
    /// Allow or deny.
    pub access: RuleAccess,
    /// Priority, lower wins.
    pub priority: u16,
    /// Traffic direction.
    pub direction: RuleDirection,
}

fn wildcard() -> String {
    String::from("*")
}

/// Marketplace image reference for a virtual machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageReference {
    /// Image publisher.
    pub publisher: String,
    /// Image offer.
    pub offer: String,
    /// Image SKU.
    pub sku: String,
    /// Image version.
    #[serde(default = "default_image_version")]
    pub version: String,
}

fn default_image_version() -> String {
    String::from("latest")
}

impl Default for ImageReference {
    fn default() -> Self {
        Self {
            publisher: String::from("Canonical"),
            offer: String::from("0001-com-ubuntu-server-jammy"),
            sku: String::from("22_04-lts-gen2"),
            version: default_image_version(),
        }
    }
}

/// Desired subnet definition inside a virtual network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetData {
    /// Subnet name.
    pub name: String,
    /// Address prefix in CIDR notation.
    pub address_prefix: String,
    /// Network security group attached to the subnet.
    pub network_security_group: Option<ResourceId>,
}

/// Desired configuration of a resource, one variant per [`ResourceKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceConfig {
    /// Resource group.
    ResourceGroup {
        /// Azure region.
        location: String,
        /// Tags applied to the group.
        tags: BTreeMap<String, String>,
    },
    /// Network security group.
    NetworkSecurityGroup {
        /// Azure region.
        location: String,
        /// Security rules.
        security_rules: Vec<SecurityRule>,
    },
    /// Virtual network.
    VirtualNetwork {
        /// Azure region.
        location: String,
        /// Address space.
        address_prefixes: Vec<String>,
        /// Subnets; ARM replaces the whole list on every update.
        subnets: Vec<SubnetData>,
    },
    /// Static public IP address.
    PublicIpAddress {
        /// Azure region.
        location: String,
    },
    /// Network interface in a subnet.
    NetworkInterface {
        /// Azure region.
        location: String,
        /// Subnet the primary IP configuration lives in.
        subnet: ResourceId,
        /// Optional public IP address.
        public_ip: Option<ResourceId>,
    },
    /// Virtual machine.
    VirtualMachine {
        /// Azure region.
        location: String,
        /// Host name inside the guest OS.
        computer_name: String,
        /// VM size, e.g. `Standard_B1s`.
        size: String,
        /// OS image.
        image: ImageReference,
        /// Administrator user name.
        admin_username: String,
        /// Administrator password.
        admin_password: String,
        /// Primary network interface.
        network_interface: ResourceId,
    },
}

impl ResourceConfig {
    /// Builds the JSON request body for a PUT.
    #[must_use]
    pub fn to_arm_body(&self) -> serde_json::Value {
        match self {
            Self::ResourceGroup { location, tags } => serde_json::json!({
                "location": location,
                "tags": tags,
            }),
            Self::NetworkSecurityGroup {
                location,
                security_rules,
            } => serde_json::json!({
                "location": location,
                "properties": {
                    "securityRules": security_rules.iter().map(|r| serde_json::json!({
                        "name": r.name,
                        "properties": {
                            "protocol": r.protocol.as_arm(),
                            "sourcePortRange": r.source_port_range,
                            "destinationPortRange": r.destination_port_range,
                            "sourceAddressPrefix": r.source_address_prefix,
                            "destinationAddressPrefix": r.destination_address_prefix,
                            "access": r.access.as_arm(),
                            "priority": r.priority,
                            "direction": r.direction.as_arm(),
                        }
                    })).collect::<Vec<_>>(),
                }
            }),
            Self::VirtualNetwork {
                location,
                address_prefixes,
                subnets,
            } => serde_json::json!({
                "location": location,
                "properties": {
                    "addressSpace": { "addressPrefixes": address_prefixes },
                    "subnets": subnets.iter().map(|s| {
                        let mut properties = serde_json::json!({ "addressPrefix": s.address_prefix });
                        if let Some(nsg) = &s.network_security_group {
                            properties["networkSecurityGroup"] = serde_json::json!({ "id": nsg });
                        }
                        serde_json::json!({ "name": s.name, "properties": properties })
                    }).collect::<Vec<_>>(),
                }
            }),
            Self::PublicIpAddress { location } => serde_json::json!({
                "location": location,
                "sku": { "name": "Standard" },
                "properties": { "publicIPAllocationMethod": "Static" },
            }),
            Self::NetworkInterface {
                location,
                subnet,
                public_ip,
            } => {
                let mut ip_properties = serde_json::json!({
                    "subnet": { "id": subnet },
                    "privateIPAllocationMethod": "Dynamic",
                });
                if let Some(pip) = public_ip {
                    ip_properties["publicIPAddress"] = serde_json::json!({ "id": pip });
                }
                serde_json::json!({
                    "location": location,
                    "properties": {
                        "ipConfigurations": [{ "name": "primary", "properties": ip_properties }],
                    }
                })
            }
            Self::VirtualMachine {
                location,
                computer_name,
                size,
                image,
                admin_username,
                admin_password,
                network_interface,
            } => serde_json::json!({
                "location": location,
                "properties": {
                    "hardwareProfile": { "vmSize": size },
                    "storageProfile": {
                        "imageReference": {
                            "publisher": image.publisher,
                            "offer": image.offer,
                            "sku": image.sku,
                            "version": image.version,
                        },
                        "osDisk": {
                            "createOption": "FromImage",
                            "deleteOption": "Delete",
                            "managedDisk": { "storageAccountType": "Standard_LRS" },
                        },
                    },
                    "osProfile": {
                        "computerName": computer_name,
                        "adminUsername": admin_username,
                        "adminPassword": admin_password,
                    },
                    "networkProfile": {
                        "networkInterfaces": [{
                            "id": network_interface,
                            "properties": { "primary": true },
                        }],
                    },
                }
            }),
        }
    }
}

/// Generic ARM resource envelope as returned by GET/PUT.
#[derive(Debug, Clone, Deserialize)]
pub struct ArmResource {
    /// Resource id.
    pub id: String,
    /// Resource location.
    #[serde(default)]
    pub location: Option<String>,
    /// Resource tags.
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
    /// Kind-specific properties.
    #[serde(default)]
    pub properties: serde_json::Value,
}

/// A page of a list response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ArmPage {
    #[serde(default)]
    pub value: Vec<ArmResource>,
    #[serde(default)]
    pub next_link: Option<String>,
}

/// A resource created or observed through ARM.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceHandle {
    /// Resource id.
    pub id: ResourceId,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resource location.
    pub location: Option<String>,
    /// Resource tags.
    pub tags: BTreeMap<String, String>,
    /// Kind-specific properties as last reported by ARM.
    pub properties: serde_json::Value,
}

/// A subnet as reported inside a virtual network's properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetInfo {
    /// Subnet name.
    pub name: String,
    /// Subnet id.
    pub id: Option<ResourceId>,
    /// Attached network security group.
    pub network_security_group: Option<ResourceId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSubnet {
    name: String,
    #[serde(default)]
    id: Option<ResourceId>,
    #[serde(default)]
    properties: Option<WireSubnetProperties>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSubnetProperties {
    #[serde(default)]
    network_security_group: Option<WireReference>,
}

#[derive(Deserialize)]
struct WireReference {
    id: ResourceId,
}

impl ResourceHandle {
    /// Builds a handle from an ARM response.
    ///
    /// # Errors
    ///
    /// Returns an error if the id in the response is malformed.
    pub fn from_arm(kind: ResourceKind, resource: ArmResource) -> Result<Self> {
        Ok(Self {
            id: ResourceId::parse(&resource.id)?,
            kind,
            location: resource.location,
            tags: resource.tags.unwrap_or_default(),
            properties: resource.properties,
        })
    }

    /// Returns the resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.id.name()
    }

    /// Returns the ARM provisioning state, if reported.
    #[must_use]
    pub fn provisioning_state(&self) -> Option<&str> {
        self.properties
            .get("provisioningState")
            .and_then(serde_json::Value::as_str)
    }

    /// Returns the subnets of a virtual network handle.
    #[must_use]
    pub fn subnets(&self) -> Vec<SubnetInfo> {
        let Some(subnets) = self.properties.get("subnets") else {
            return Vec::new();
        };

        serde_json::from_value::<Vec<WireSubnet>>(subnets.clone())
            .unwrap_or_default()
            .into_iter()
            .map(|s| SubnetInfo {
                name: s.name,
                id: s.id,
                network_security_group: s
                    .properties
                    .and_then(|p| p.network_security_group)
                    .map(|r| r.id),
            })
            .collect()
    }

    /// Finds a subnet by name.
    #[must_use]
    pub fn subnet(&self, name: &str) -> Option<SubnetInfo> {
        self.subnets().into_iter().find(|s| s.name == name)
    }
}

/// Returns true if `state` is a terminal ARM provisioning state.
#[must_use]
pub fn is_terminal_state(state: &str) -> bool {
    ["Succeeded", "Failed", "Canceled"]
        .iter()
        .any(|s| s.eq_ignore_ascii_case(state))
}
