//! Azure Resource Manager integration module.
//!
//! This module provides authentication, the ARM REST client, resource
//! identifiers and request bodies, and the [`ResourceApi`] seam the
//! orchestrator drives.

mod auth;
mod client;
mod resources;
mod types;

pub use auth::ClientSecretCredential;
pub use client::ArmClient;
pub use resources::ResourceApi;
#[cfg(test)]
pub use resources::MockResourceApi;
pub use types::{
    is_terminal_state, ArmResource, ImageReference, ResourceConfig, ResourceHandle, ResourceId,
    ResourceKind, RuleAccess, RuleDirection, RuleProtocol, SecurityRule, SubnetData, SubnetInfo,
};
