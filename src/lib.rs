// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code is reported
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are reported
#![warn(unused_variables)]            // Unused variables are reported
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # vnet-provisioner
//!
//! Provisions a sample Azure virtual network topology into a fresh resource
//! group, then deletes the resource group again.
//!
//! ## Overview
//!
//! A run walks a plan file step by step:
//!
//! - Create a resource group that owns every other resource
//! - Create network security groups with their rules
//! - Create or update virtual networks and attach security groups to subnets
//! - Optionally create virtual machines on those subnets
//! - List and delete virtual networks
//! - Always delete the resource group at the end, whatever happened before
//!
//! ## Architecture
//!
//! 1. **Plan file**: `vnet.plan.yaml`, parsed and validated by [`config`]
//! 2. **Plan**: ordered steps with physical names, built by [`planner`]
//! 3. **Orchestrator**: runs the steps against Azure and tears down, see [`orchestrator`]
//!
//! ## Modules
//!
//! - [`config`]: Plan parsing, validation and fingerprinting
//! - [`azure`]: Azure Resource Manager client and resource types
//! - [`planner`]: Name resolution and step ordering
//! - [`orchestrator`]: Step execution, teardown and run reports
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! location: eastus
//! resource_group:
//!   name: NetworkSampleRG
//! steps:
//!   - action: create_network_security_group
//!     name: backEndNSG
//!     rules:
//!       - name: DenyInternetInComing
//!         source_address_prefix: INTERNET
//!         access: deny
//!         priority: 100
//!         direction: inbound
//!   - action: create_or_update_virtual_network
//!     name: vnet1
//!     address_prefixes: [192.168.0.0/16]
//!     subnets:
//!       - name: besubnet
//!         address_prefix: 192.168.2.0/24
//!         network_security_group: backEndNSG
//!   - action: list_virtual_networks
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod azure;
pub mod cli;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod planner;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use azure::{ArmClient, ResourceApi, ResourceHandle, ResourceId, ResourceKind};
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, PlanConfig, PlanHasher};
pub use error::{Result, VnetError};
pub use orchestrator::{Orchestrator, RunContext, RunReport};
pub use planner::{NameGenerator, ProvisioningPlan};
