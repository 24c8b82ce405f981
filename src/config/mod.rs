//! Configuration module for the vnet provisioner.
//!
//! This module handles all plan-related functionality:
//! - Parsing and deserializing `vnet.plan.yaml`
//! - Reading service principal credentials from the environment
//! - Validation of plan values
//! - Computing plan fingerprints

mod spec;
mod parser;
mod validator;
mod hash;

pub use spec::{
    AzureCredentials, AzureSettings, Ipv4Cidr, PlanConfig, ResourceGroupConfig,
    SecurityGroupConfig, StepConfig, SubnetConfig, VirtualMachineConfig, VirtualNetworkConfig,
};
pub use parser::{find_plan_file, ConfigParser, BUILTIN_PLAN, DEFAULT_PLAN_FILES};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
pub use hash::PlanHasher;
