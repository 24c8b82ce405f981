//! Plan validation.
//!
//! This module checks a plan's values before anything is sent to Azure:
//! names, address prefixes, subnet layout, security rules and VM settings.
//! Cross-step references are resolved by the planner.

use crate::error::{ConfigError, Result, VnetError};
use std::collections::HashSet;
use tracing::debug;

use super::spec::{
    Ipv4Cidr, PlanConfig, SecurityGroupConfig, StepConfig, VirtualMachineConfig,
    VirtualNetworkConfig,
};

/// Lowest priority value ARM accepts for a security rule.
const MIN_RULE_PRIORITY: u16 = 100;

/// Highest priority value ARM accepts for a security rule.
const MAX_RULE_PRIORITY: u16 = 4096;

/// Maximum length of a resource name.
const MAX_NAME_LEN: usize = 80;

/// Length of the suffix appended when names are randomized, separator included.
const RANDOM_SUFFIX_LEN: usize = 7;

/// Length of the `-pip`/`-nic` suffix on resources derived from a VM name.
const DERIVED_SUFFIX_LEN: usize = 4;

/// Azure public cloud regions.
const KNOWN_LOCATIONS: &[&str] = &[
    "australiaeast",
    "brazilsouth",
    "canadacentral",
    "centralindia",
    "centralus",
    "eastasia",
    "eastus",
    "eastus2",
    "francecentral",
    "germanywestcentral",
    "japaneast",
    "koreacentral",
    "northcentralus",
    "northeurope",
    "norwayeast",
    "southafricanorth",
    "southcentralus",
    "southeastasia",
    "swedencentral",
    "switzerlandnorth",
    "uaenorth",
    "uksouth",
    "westeurope",
    "westus",
    "westus2",
    "westus3",
];

/// Validator for plans.
#[derive(Debug, Default)]
pub struct ConfigValidator {
    /// Regions that do not trigger an "unknown location" warning.
    known_locations: HashSet<String>,
}

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl ConfigValidator {
    /// Creates a new validator with the public Azure regions.
    #[must_use]
    pub fn new() -> Self {
        Self {
            known_locations: KNOWN_LOCATIONS.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Collects every problem in a plan without failing.
    #[must_use]
    pub fn check(&self, config: &PlanConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_top_level(config, &mut result);

        for (i, step) in config.steps.iter().enumerate() {
            let field = format!("steps[{i}]");
            match step {
                StepConfig::CreateNetworkSecurityGroup(nsg) => {
                    validate_security_group(nsg, &field, config.randomize_names, &mut result);
                }
                StepConfig::CreateOrUpdateVirtualNetwork(vnet) => {
                    validate_network(vnet, &field, config.randomize_names, &mut result);
                }
                StepConfig::CreateVirtualMachine(vm) => {
                    validate_virtual_machine(vm, &field, config.randomize_names, &mut result);
                }
                StepConfig::ListVirtualNetworks => {}
                StepConfig::DeleteVirtualNetwork { name } => {
                    validate_name(name, &format!("{field}.name"), false, &mut result);
                }
            }
        }

        result
    }

    /// Validates a plan.
    ///
    /// # Errors
    ///
    /// Returns the first error found if validation fails.
    pub fn validate(&self, config: &PlanConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if let Some(first_error) = result.errors.first() {
            return Err(VnetError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }));
        }

        debug!("Plan validation passed with {} warnings", result.warning_count());
        Ok(result)
    }

    fn validate_top_level(&self, config: &PlanConfig, result: &mut ValidationResult) {
        if config.location.trim().is_empty() {
            result.error("location", "Location cannot be empty");
        } else if !self.known_locations.contains(&config.location) {
            result.warnings.push(format!(
                "Location '{}' is not a known Azure region",
                config.location
            ));
        }

        validate_name(
            &config.resource_group.name,
            "resource_group.name",
            config.randomize_names,
            result,
        );

        if !config.randomize_names {
            result.warnings.push(String::from(
                "randomize_names is disabled; repeated runs may collide with existing resources",
            ));
        }

        if config.azure.operation_timeout_secs == 0 {
            result.error(
                "azure.operation_timeout_secs",
                "Operation timeout must be at least 1 second",
            );
        }

        for (field, url) in [
            ("azure.management_endpoint", &config.azure.management_endpoint),
            ("azure.authority_host", &config.azure.authority_host),
        ] {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                result.error(field, format!("'{url}' is not an http(s) URL"));
            }
        }
    }
}

fn validate_security_group(
    nsg: &SecurityGroupConfig,
    field: &str,
    randomized: bool,
    result: &mut ValidationResult,
) {
    validate_name(&nsg.name, &format!("{field}.name"), randomized, result);

    let mut names = HashSet::new();
    let mut priorities = HashSet::new();

    for (i, rule) in nsg.rules.iter().enumerate() {
        let rule_field = format!("{field}.rules[{i}]");

        if !names.insert(rule.name.as_str()) {
            result.error(
                format!("{rule_field}.name"),
                format!("Duplicate rule name '{}'", rule.name),
            );
        }
        validate_name(&rule.name, &format!("{rule_field}.name"), false, result);

        if !(MIN_RULE_PRIORITY..=MAX_RULE_PRIORITY).contains(&rule.priority) {
            result.error(
                format!("{rule_field}.priority"),
                format!(
                    "Priority {} is outside {MIN_RULE_PRIORITY}..={MAX_RULE_PRIORITY}",
                    rule.priority
                ),
            );
        } else if !priorities.insert((rule.direction, rule.priority)) {
            result.error(
                format!("{rule_field}.priority"),
                format!(
                    "Priority {} is already used by another {:?} rule",
                    rule.priority, rule.direction
                ),
            );
        }

        for (name, range) in [
            ("source_port_range", &rule.source_port_range),
            ("destination_port_range", &rule.destination_port_range),
        ] {
            if !is_valid_port_range(range) {
                result.error(
                    format!("{rule_field}.{name}"),
                    format!("'{range}' is not '*', a port, or a port range"),
                );
            }
        }
    }
}

fn validate_network(
    vnet: &VirtualNetworkConfig,
    field: &str,
    randomized: bool,
    result: &mut ValidationResult,
) {
    validate_name(&vnet.name, &format!("{field}.name"), randomized, result);

    if vnet.address_prefixes.is_empty() {
        result.error(
            format!("{field}.address_prefixes"),
            "A virtual network needs at least one address prefix",
        );
    }

    let mut space = Vec::new();
    for (i, prefix) in vnet.address_prefixes.iter().enumerate() {
        match Ipv4Cidr::parse(prefix) {
            Ok(cidr) => space.push(cidr),
            Err(e) => result.error(format!("{field}.address_prefixes[{i}]"), e),
        }
    }

    let mut names = HashSet::new();
    let mut seen: Vec<(&str, Ipv4Cidr)> = Vec::new();

    for (i, subnet) in vnet.subnets.iter().enumerate() {
        let subnet_field = format!("{field}.subnets[{i}]");

        validate_name(&subnet.name, &format!("{subnet_field}.name"), false, result);
        if !names.insert(subnet.name.as_str()) {
            result.error(
                format!("{subnet_field}.name"),
                format!("Duplicate subnet name '{}'", subnet.name),
            );
        }

        let cidr = match Ipv4Cidr::parse(&subnet.address_prefix) {
            Ok(cidr) => cidr,
            Err(e) => {
                result.error(format!("{subnet_field}.address_prefix"), e);
                continue;
            }
        };

        if !space.is_empty() && !space.iter().any(|s| s.contains(cidr)) {
            result.error(
                format!("{subnet_field}.address_prefix"),
                format!(
                    "Subnet {cidr} is outside the address space of '{}'",
                    vnet.name
                ),
            );
        }

        if let Some((other, _)) = seen.iter().find(|(_, c)| c.overlaps(cidr)) {
            result.error(
                format!("{subnet_field}.address_prefix"),
                format!("Subnet {cidr} overlaps subnet '{other}'"),
            );
        }
        seen.push((&subnet.name, cidr));
    }
}

fn validate_virtual_machine(
    vm: &VirtualMachineConfig,
    field: &str,
    randomized: bool,
    result: &mut ValidationResult,
) {
    validate_name_within(
        &vm.name,
        &format!("{field}.name"),
        name_limit(randomized) - DERIVED_SUFFIX_LEN,
        result,
    );

    if vm.size.trim().is_empty() {
        result.error(format!("{field}.size"), "VM size cannot be empty");
    }

    if vm.admin_username.trim().is_empty() {
        result.error(format!("{field}.admin_username"), "Admin username cannot be empty");
    } else if matches!(
        vm.admin_username.to_ascii_lowercase().as_str(),
        "admin" | "administrator" | "root" | "guest"
    ) {
        result.error(
            format!("{field}.admin_username"),
            format!("'{}' is a reserved user name", vm.admin_username),
        );
    }

    if let Some(password) = &vm.admin_password
        && !is_complex_password(password)
    {
        result.error(
            format!("{field}.admin_password"),
            "Password needs 12 to 72 characters from three of: lowercase, uppercase, digit, symbol",
        );
    }

    if vm.admin_password.is_some() {
        result.warnings.push(format!(
            "{field}.admin_password is stored in plain text in the plan file"
        ));
    }
}

/// Validates an Azure resource name.
/// Names are 1 to 80 characters of alphanumerics, `-`, `_` and `.`,
/// starting with an alphanumeric and not ending with `.` or `-`.
fn validate_name(name: &str, field: &str, randomized: bool, result: &mut ValidationResult) {
    validate_name_within(name, field, name_limit(randomized), result);
}

/// Longest logical name that still fits once the random suffix is added.
const fn name_limit(randomized: bool) -> usize {
    if randomized {
        MAX_NAME_LEN - RANDOM_SUFFIX_LEN
    } else {
        MAX_NAME_LEN
    }
}

fn validate_name_within(name: &str, field: &str, max: usize, result: &mut ValidationResult) {
    if name.is_empty() {
        result.error(field, "Name cannot be empty");
    } else if name.len() > max {
        result.error(field, format!("Name '{name}' is longer than {max} characters"));
    } else if !is_valid_name(name) {
        result.error(
            field,
            format!("Name '{name}' is invalid. Use letters, digits, '-', '_' and '.'"),
        );
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    if let Some(first) = chars.next()
        && !first.is_ascii_alphanumeric()
    {
        return false;
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return false;
    }

    !name.ends_with('.') && !name.ends_with('-')
}

fn is_valid_port_range(range: &str) -> bool {
    if range == "*" {
        return true;
    }

    let parse = |s: &str| s.parse::<u16>().ok().filter(|p| *p > 0);

    match range.split_once('-') {
        Some((low, high)) => matches!((parse(low), parse(high)), (Some(l), Some(h)) if l <= h),
        None => parse(range).is_some(),
    }
}

fn is_complex_password(password: &str) -> bool {
    let classes = [
        password.chars().any(|c| c.is_ascii_lowercase()),
        password.chars().any(|c| c.is_ascii_uppercase()),
        password.chars().any(|c| c.is_ascii_digit()),
        password.chars().any(|c| !c.is_ascii_alphanumeric()),
    ];

    (12..=72).contains(&password.len()) && classes.iter().filter(|c| **c).count() >= 3
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn check(yaml: &str) -> ValidationResult {
        let config = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        ConfigValidator::new().check(&config)
    }

    fn fields(result: &ValidationResult) -> Vec<&str> {
        result.errors.iter().map(|e| e.field.as_str()).collect()
    }

    #[test]
    fn test_builtin_plan_is_valid() {
        let config = ConfigParser::new()
            .parse_yaml(crate::config::BUILTIN_PLAN, None)
            .unwrap();
        let result = ConfigValidator::new().validate(&config).unwrap();
        assert!(result.is_valid());
    }

    #[test]
    fn test_subnet_outside_address_space() {
        let result = check(
            r"
resource_group: { name: rg }
steps:
  - action: create_or_update_virtual_network
    name: vnet1
    address_prefixes: [192.168.0.0/16]
    subnets:
      - { name: inside, address_prefix: 192.168.1.0/24 }
      - { name: outside, address_prefix: 10.0.0.0/24 }
",
        );
        assert_eq!(fields(&result), vec!["steps[0].subnets[1].address_prefix"]);
    }

    #[test]
    fn test_overlapping_and_malformed_subnets() {
        let result = check(
            r"
resource_group: { name: rg }
steps:
  - action: create_or_update_virtual_network
    name: vnet1
    address_prefixes: [10.0.0.0/16]
    subnets:
      - { name: a, address_prefix: 10.0.0.0/24 }
      - { name: b, address_prefix: 10.0.0.128/25 }
      - { name: a, address_prefix: 10.0.1.0/33 }
",
        );
        assert_eq!(
            fields(&result),
            vec![
                "steps[0].subnets[1].address_prefix",
                "steps[0].subnets[2].name",
                "steps[0].subnets[2].address_prefix",
            ]
        );
    }

    #[test]
    fn test_rule_priorities() {
        let result = check(
            r#"
resource_group: { name: rg }
steps:
  - action: create_network_security_group
    name: nsg
    rules:
      - { name: low, access: deny, priority: 50, direction: inbound }
      - { name: in, access: deny, priority: 100, direction: inbound }
      - { name: out, access: deny, priority: 100, direction: outbound }
      - { name: clash, access: allow, priority: 100, direction: inbound }
      - { name: ports, access: allow, priority: 200, direction: inbound, destination_port_range: "90-80" }
"#,
        );
        assert_eq!(
            fields(&result),
            vec![
                "steps[0].rules[0].priority",
                "steps[0].rules[3].priority",
                "steps[0].rules[4].destination_port_range",
            ]
        );
    }

    #[test]
    fn test_validate_returns_first_error() {
        let config = ConfigParser::new()
            .parse_yaml("location: ''\nresource_group: { name: rg }\n", None)
            .unwrap();
        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert!(matches!(
            err,
            VnetError::Config(ConfigError::ValidationError { field: Some(ref f), .. }) if f == "location"
        ));
    }

    #[test]
    fn test_warnings() {
        let result = check("location: mars\nrandomize_names: false\nresource_group: { name: rg }\n");
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 2);
    }

    #[test]
    fn test_vm_settings() {
        let result = check(
            r"
resource_group: { name: rg }
steps:
  - action: create_virtual_machine
    name: vm
    virtual_network: vnet
    subnet: default
    admin_username: root
    admin_password: short
",
        );
        assert_eq!(
            fields(&result),
            vec!["steps[0].admin_username", "steps[0].admin_password"]
        );
    }

    #[test]
    fn test_vm_name_leaves_room_for_derived_names() {
        let vm = |name: &str, randomize: bool| {
            check(&format!(
                r"
resource_group: {{ name: rg }}
randomize_names: {randomize}
steps:
  - action: create_virtual_machine
    name: {name}
    virtual_network: vnet
    subnet: default
    admin_username: azureuser
"
            ))
        };

        assert!(fields(&vm(&"v".repeat(69), true)).is_empty());
        assert_eq!(fields(&vm(&"v".repeat(70), true)), vec!["steps[0].name"]);
        assert!(fields(&vm(&"v".repeat(76), false)).is_empty());
        assert_eq!(fields(&vm(&"v".repeat(77), false)), vec!["steps[0].name"]);
    }

    #[test]
    fn test_names() {
        assert!(is_valid_name("backEndNSG"));
        assert!(is_valid_name("vnet_1.a"));
        assert!(!is_valid_name("-vnet"));
        assert!(!is_valid_name("vnet."));
        assert!(!is_valid_name("v net"));
    }

    #[test]
    fn test_port_ranges() {
        assert!(is_valid_port_range("*"));
        assert!(is_valid_port_range("80"));
        assert!(is_valid_port_range("8000-8080"));
        assert!(!is_valid_port_range("0"));
        assert!(!is_valid_port_range("80-"));
        assert!(!is_valid_port_range("http"));
    }
}
