//! CLI module for the vnet provisioner.
//!
//! This module provides the command-line interface for running,
//! planning and validating provisioning plans.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat};
pub use output::OutputFormatter;
