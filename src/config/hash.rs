//! Plan fingerprinting.
//!
//! This module provides deterministic hashing of plan files so that the
//! resource group of every run can be tagged with the plan that built it.

use sha2::{Digest, Sha256};

use crate::azure::SecurityRule;

use super::spec::{PlanConfig, StepConfig};

/// Hasher for computing plan fingerprints.
#[derive(Debug, Default)]
pub struct PlanHasher;

impl PlanHasher {
    /// Creates a new plan hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the entire plan.
    ///
    /// Step order is significant; rule and tag order are not.
    #[must_use]
    pub fn hash_plan(&self, config: &PlanConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(config.location.as_bytes());
        hasher.update([u8::from(config.randomize_names)]);
        hasher.update(config.resource_group.name.as_bytes());

        // BTreeMap iterates in key order
        for (key, value) in &config.resource_group.tags {
            hasher.update(key.as_bytes());
            hasher.update(value.as_bytes());
        }

        for step in &config.steps {
            hasher.update(self.hash_step(step).as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single step.
    #[must_use]
    pub fn hash_step(&self, step: &StepConfig) -> String {
        let mut hasher = Sha256::new();
        hasher.update(step.action().as_bytes());

        match step {
            StepConfig::CreateNetworkSecurityGroup(nsg) => {
                hasher.update(nsg.name.as_bytes());

                let mut rules: Vec<_> = nsg.rules.iter().collect();
                rules.sort_by(|a, b| a.name.cmp(&b.name));
                for rule in rules {
                    Self::hash_rule(&mut hasher, rule);
                }
            }
            StepConfig::CreateOrUpdateVirtualNetwork(vnet) => {
                hasher.update(vnet.name.as_bytes());
                for prefix in &vnet.address_prefixes {
                    hasher.update(prefix.as_bytes());
                }

                let mut subnets: Vec<_> = vnet.subnets.iter().collect();
                subnets.sort_by(|a, b| a.name.cmp(&b.name));
                for subnet in subnets {
                    hasher.update(subnet.name.as_bytes());
                    hasher.update(subnet.address_prefix.as_bytes());
                    if let Some(nsg) = &subnet.network_security_group {
                        hasher.update(nsg.as_bytes());
                    }
                }
            }
            StepConfig::CreateVirtualMachine(vm) => {
                hasher.update(vm.name.as_bytes());
                hasher.update(vm.virtual_network.as_bytes());
                hasher.update(vm.subnet.as_bytes());
                hasher.update(vm.size.as_bytes());
                hasher.update(vm.image.publisher.as_bytes());
                hasher.update(vm.image.offer.as_bytes());
                hasher.update(vm.image.sku.as_bytes());
                hasher.update(vm.image.version.as_bytes());
                hasher.update(vm.admin_username.as_bytes());
                hasher.update([u8::from(vm.public_ip)]);
            }
            StepConfig::ListVirtualNetworks => {}
            StepConfig::DeleteVirtualNetwork { name } => {
                hasher.update(name.as_bytes());
            }
        }

        hex::encode(hasher.finalize())
    }

    fn hash_rule(hasher: &mut Sha256, rule: &SecurityRule) {
        hasher.update(rule.name.as_bytes());
        hasher.update(format!("{:?}", rule.protocol).as_bytes());
        hasher.update(rule.source_port_range.as_bytes());
        hasher.update(rule.destination_port_range.as_bytes());
        hasher.update(rule.source_address_prefix.as_bytes());
        hasher.update(rule.destination_address_prefix.as_bytes());
        hasher.update(format!("{:?}", rule.access).as_bytes());
        hasher.update(rule.priority.to_be_bytes());
        hasher.update(format!("{:?}", rule.direction).as_bytes());
    }

    /// Returns a shortened version of a hash for display.
    #[must_use]
    pub fn short_hash(hash: &str) -> &str {
        &hash[..hash.len().min(12)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn plan(yaml: &str) -> PlanConfig {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    const BASE: &str = r#"
resource_group:
  name: rg
  tags:
    team: net
    env: dev
steps:
  - action: create_network_security_group
    name: nsg1
    rules:
      - { name: a, access: deny, priority: 100, direction: inbound }
      - { name: b, access: deny, priority: 200, direction: outbound }
  - action: list_virtual_networks
"#;

    #[test]
    fn test_hash_is_deterministic() {
        let hasher = PlanHasher::new();
        let config = plan(BASE);

        let hash = hasher.hash_plan(&config);
        assert_eq!(hash, hasher.hash_plan(&config));
        assert_eq!(hash.len(), 64);
    }

    #[test]
    fn test_rule_order_does_not_matter() {
        let hasher = PlanHasher::new();
        let swapped = BASE.replace(
            "      - { name: a, access: deny, priority: 100, direction: inbound }\n      - { name: b, access: deny, priority: 200, direction: outbound }",
            "      - { name: b, access: deny, priority: 200, direction: outbound }\n      - { name: a, access: deny, priority: 100, direction: inbound }",
        );
        assert_ne!(swapped, BASE);
        assert_eq!(hasher.hash_plan(&plan(BASE)), hasher.hash_plan(&plan(&swapped)));
    }

    #[test]
    fn test_step_order_matters() {
        let hasher = PlanHasher::new();
        let mut reordered = plan(BASE);
        reordered.steps.reverse();
        assert_ne!(hasher.hash_plan(&plan(BASE)), hasher.hash_plan(&reordered));
    }

    #[test]
    fn test_short_hash() {
        assert_eq!(PlanHasher::short_hash("abcdef0123456789"), "abcdef012345");
        assert_eq!(PlanHasher::short_hash("abc"), "abc");
    }
}
