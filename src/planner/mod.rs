//! Planning module for provisioning runs.
//!
//! This module resolves a plan file into an ordered, validated list of
//! steps with physical resource names.

mod names;
mod plan;

pub use names::{generate_password, NameGenerator};
pub use plan::{
    PlannedStep, PlannedSubnet, ProvisioningPlan, RootScopeSpec, StepAction, ROOT_STEP_INDEX,
};
